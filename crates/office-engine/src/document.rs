//! Document handles and classification.
//!
//! A [`DocumentHandle`] refers to the document currently open inside one
//! specific engine instance. It is plain data: every operation on the
//! document goes through the owning session, so a handle can never outlive
//! or migrate between instances by construction. The capability set is
//! whatever the engine reported at load time; classification predicates
//! are pure reads over it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A structural capability reported by the engine for a loaded document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Free-form drawing surface (generic drawing document).
    DrawingSurface,
    /// Slide deck (presentation document).
    SlideDeck,
    /// Flowing text body (text document).
    TextFlow,
    /// Cell grid (spreadsheet document).
    SpreadsheetGrid,
}

/// The broad family a loaded document belongs to, derived from its
/// capability set. Used to pick the right export filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentFamily {
    Text,
    Spreadsheet,
    Presentation,
    Drawing,
}

/// Reference to the document open inside one engine instance.
///
/// Invalid once the document is closed or the instance dies; the session
/// that produced it is the only way to act on it.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    id: Uuid,
    capabilities: Vec<Capability>,
}

impl DocumentHandle {
    pub fn new(id: Uuid, capabilities: Vec<Capability>) -> Self {
        Self { id, capabilities }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Family of the loaded document, if it maps onto one.
    ///
    /// Slide decks win over drawing surfaces: presentation documents also
    /// expose a drawing surface, and must not be exported as drawings.
    pub fn family(&self) -> Option<DocumentFamily> {
        if is_impress(self) {
            Some(DocumentFamily::Presentation)
        } else if is_draw(self) {
            Some(DocumentFamily::Drawing)
        } else if is_calc(self) {
            Some(DocumentFamily::Spreadsheet)
        } else if is_text(self) {
            Some(DocumentFamily::Text)
        } else {
            None
        }
    }
}

/// True iff the document exposes a drawing surface and is not a slide deck.
pub fn is_draw(document: &DocumentHandle) -> bool {
    document.supports(Capability::DrawingSurface) && !document.supports(Capability::SlideDeck)
}

/// True iff the document is a slide deck.
pub fn is_impress(document: &DocumentHandle) -> bool {
    document.supports(Capability::SlideDeck)
}

/// True iff the document has a flowing text body.
pub fn is_text(document: &DocumentHandle) -> bool {
    document.supports(Capability::TextFlow)
}

/// True iff the document is a cell grid.
pub fn is_calc(document: &DocumentHandle) -> bool {
    document.supports(Capability::SpreadsheetGrid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn doc(capabilities: Vec<Capability>) -> DocumentHandle {
        DocumentHandle::new(Uuid::new_v4(), capabilities)
    }

    #[rstest]
    #[case(vec![Capability::DrawingSurface], true)]
    #[case(vec![Capability::TextFlow], false)]
    #[case(vec![Capability::SlideDeck], false)]
    #[case(vec![Capability::DrawingSurface, Capability::SlideDeck], false)]
    #[case(vec![], false)]
    fn is_draw_excludes_slide_decks(#[case] caps: Vec<Capability>, #[case] expected: bool) {
        assert_eq!(is_draw(&doc(caps)), expected);
    }

    #[rstest]
    #[case(vec![Capability::SlideDeck], true)]
    #[case(vec![Capability::DrawingSurface, Capability::SlideDeck], true)]
    #[case(vec![Capability::TextFlow], false)]
    #[case(vec![Capability::DrawingSurface], false)]
    fn is_impress_requires_slide_deck(#[case] caps: Vec<Capability>, #[case] expected: bool) {
        assert_eq!(is_impress(&doc(caps)), expected);
    }

    #[test]
    fn text_document_is_neither_draw_nor_impress() {
        let d = doc(vec![Capability::TextFlow]);
        assert!(!is_draw(&d));
        assert!(!is_impress(&d));
        assert!(is_text(&d));
    }

    #[rstest]
    #[case(vec![Capability::TextFlow], Some(DocumentFamily::Text))]
    #[case(vec![Capability::SpreadsheetGrid], Some(DocumentFamily::Spreadsheet))]
    #[case(vec![Capability::DrawingSurface], Some(DocumentFamily::Drawing))]
    #[case(vec![Capability::DrawingSurface, Capability::SlideDeck], Some(DocumentFamily::Presentation))]
    #[case(vec![], None)]
    fn family_prefers_presentation_over_drawing(
        #[case] caps: Vec<Capability>,
        #[case] expected: Option<DocumentFamily>,
    ) {
        assert_eq!(doc(caps).family(), expected);
    }
}
