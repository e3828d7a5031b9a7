//! An editing session: document, preview and offscreen host kept in step

use anyhow::Result;
use mark2pdf_core::math::{KatexTypesetter, Typesetter};
use mark2pdf_core::{Document, RenderedMarkup, Renderer};

use crate::error::ExportError;
use crate::export::{ExportArtifact, Exporter};
use crate::host::OffscreenHost;
use crate::raster::Rasterizer;
use crate::status::Notifier;

pub struct Session<T = KatexTypesetter> {
    doc: Document,
    renderer: Renderer<T>,
    preview: RenderedMarkup,
    host: OffscreenHost,
}

impl<T: Typesetter> Session<T> {
    pub fn new(doc: Document, renderer: Renderer<T>, host: OffscreenHost) -> Self {
        let preview = renderer.render_document(&doc);
        let mut session = Self {
            doc,
            renderer,
            preview,
            host,
        };
        session.sync_host();
        session
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// The markup shown to the user
    pub fn preview(&self) -> &RenderedMarkup {
        &self.preview
    }

    pub fn host(&self) -> &OffscreenHost {
        &self.host
    }

    /// Replace the document text and re-render
    pub fn edit(&mut self, text: impl Into<String>) {
        self.doc.set_text(text);
        self.refresh();
    }

    /// Re-read the document from disk and re-render
    pub fn reload(&mut self) -> Result<()> {
        self.doc.reload()?;
        self.refresh();
        Ok(())
    }

    pub fn mount_host(&mut self) {
        self.host.mount();
        self.sync_host();
    }

    pub fn unmount_host(&mut self) {
        self.host.unmount();
    }

    /// Export the current revision. The document and preview are left as they were.
    pub fn export<R: Rasterizer, N: Notifier>(
        &self,
        exporter: &mut Exporter<R, N>,
    ) -> Result<ExportArtifact, ExportError> {
        let title = self.doc.title();
        exporter.export(&self.host, title.as_deref())
    }

    fn refresh(&mut self) {
        self.preview = self.renderer.render_document(&self.doc);
        self.sync_host();
    }

    fn sync_host(&mut self) {
        if !self.host.is_mounted() {
            return;
        }
        if let Err(err) = self
            .host
            .populate(self.preview.clone(), self.doc.base_dir())
        {
            log::debug!("Host not updated: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(text: &str) -> Session {
        Session::new(
            Document::from_text(text),
            Renderer::default(),
            OffscreenHost::default(),
        )
    }

    #[test]
    fn test_preview_tracks_edits() {
        let mut session = session("# One\n");
        assert!(session.preview().html.contains("<h1>One</h1>"));
        assert_eq!(session.preview().rev, 1);

        session.edit("# Two\n");
        assert!(session.preview().html.contains("<h1>Two</h1>"));
        assert_eq!(session.preview().rev, 2);
        assert_eq!(session.host().content().unwrap().rev, 2);
    }

    #[test]
    fn test_unmounted_host_keeps_preview_current() {
        let mut session = session("# One\n");
        session.unmount_host();
        session.edit("# Two\n");

        assert!(session.preview().html.contains("<h1>Two</h1>"));
        assert!(matches!(
            session.host().content(),
            Err(ExportError::MissingTarget)
        ));

        session.mount_host();
        assert_eq!(session.host().content().unwrap().rev, 2);
    }

    #[test]
    fn test_reload_without_file_fails() {
        let mut session = session("text");
        assert!(session.reload().is_err());
        assert_eq!(session.document().rev, 1);
    }
}
