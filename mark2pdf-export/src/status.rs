//! Export status notifications

use std::fmt;

/// What the user is told about an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Started,
    Succeeded { pages: usize, bytes: usize },
    Failed { summary: String },
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStatus::Started => write!(f, "Exporting PDF..."),
            ExportStatus::Succeeded { pages, bytes } => {
                let plural = if *pages == 1 { "" } else { "s" };
                write!(f, "Exported {pages} page{plural} ({bytes} bytes)")
            }
            ExportStatus::Failed { summary } => write!(f, "Export failed: {summary}"),
        }
    }
}

pub trait Notifier {
    fn notify(&self, status: &ExportStatus);
}

impl<F: Fn(&ExportStatus)> Notifier for F {
    fn notify(&self, status: &ExportStatus) {
        self(status)
    }
}

/// Routes notifications to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, status: &ExportStatus) {
        match status {
            ExportStatus::Started => log::debug!("{}", status),
            ExportStatus::Succeeded { .. } => log::info!("{}", status),
            ExportStatus::Failed { .. } => log::error!("{}", status),
        }
    }
}
