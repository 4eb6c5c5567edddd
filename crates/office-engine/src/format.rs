//! Target-format registry.
//!
//! The engine needs a family-specific export filter name for each target
//! format: exporting a slide deck to PDF uses a different filter than
//! exporting a text document to PDF. The registry maps a target extension
//! to the filter for each document family that can produce it, so callers
//! ask for "pdf" and the dispatcher resolves the rest from the loaded
//! document's classification.

use std::sync::LazyLock;

use crate::document::DocumentFamily;
use crate::protocol::ExportOptions;

/// One exportable format and its per-family engine filters.
#[derive(Debug, Clone)]
pub struct DocumentFormat {
    pub name: &'static str,
    pub extension: &'static str,
    pub media_type: &'static str,
    store_filters: &'static [(DocumentFamily, &'static str)],
    /// Extra store properties forwarded with every export of this format.
    filter_options: Option<&'static str>,
}

impl DocumentFormat {
    /// Engine export filter for `family`, if this format supports it.
    pub fn store_filter(&self, family: DocumentFamily) -> Option<&'static str> {
        self.store_filters
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, filter)| *filter)
    }

    /// Ready-to-send export options for `family`.
    pub fn export_options(&self, family: DocumentFamily) -> Option<ExportOptions> {
        let mut options = ExportOptions::with_filter(self.store_filter(family)?);
        if let Some(filter_options) = self.filter_options {
            options
                .properties
                .insert("FilterOptions".to_string(), filter_options.into());
        }
        Some(options)
    }
}

use DocumentFamily::{Drawing, Presentation, Spreadsheet, Text};

static FORMATS: &[DocumentFormat] = &[
    DocumentFormat {
        name: "Portable Document Format",
        extension: "pdf",
        media_type: "application/pdf",
        store_filters: &[
            (Text, "writer_pdf_Export"),
            (Spreadsheet, "calc_pdf_Export"),
            (Presentation, "impress_pdf_Export"),
            (Drawing, "draw_pdf_Export"),
        ],
        filter_options: None,
    },
    DocumentFormat {
        name: "HTML",
        extension: "html",
        media_type: "text/html",
        store_filters: &[
            (Text, "HTML (StarWriter)"),
            (Spreadsheet, "HTML (StarCalc)"),
            (Presentation, "impress_html_Export"),
        ],
        filter_options: None,
    },
    DocumentFormat {
        name: "Plain Text",
        extension: "txt",
        media_type: "text/plain",
        store_filters: &[(Text, "Text (encoded)")],
        filter_options: Some("utf8"),
    },
    DocumentFormat {
        name: "OpenDocument Text",
        extension: "odt",
        media_type: "application/vnd.oasis.opendocument.text",
        store_filters: &[(Text, "writer8")],
        filter_options: None,
    },
    DocumentFormat {
        name: "Microsoft Word 2007-365",
        extension: "docx",
        media_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        store_filters: &[(Text, "MS Word 2007 XML")],
        filter_options: None,
    },
    DocumentFormat {
        name: "OpenDocument Spreadsheet",
        extension: "ods",
        media_type: "application/vnd.oasis.opendocument.spreadsheet",
        store_filters: &[(Spreadsheet, "calc8")],
        filter_options: None,
    },
    DocumentFormat {
        name: "Microsoft Excel 2007-365",
        extension: "xlsx",
        media_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        store_filters: &[(Spreadsheet, "Calc MS Excel 2007 XML")],
        filter_options: None,
    },
    DocumentFormat {
        name: "Comma-Separated Values",
        extension: "csv",
        media_type: "text/csv",
        store_filters: &[(Spreadsheet, "Text - txt - csv (StarCalc)")],
        // field separator 44 (','), text delimiter 34 ('"'), UTF-8
        filter_options: Some("44,34,76"),
    },
    DocumentFormat {
        name: "OpenDocument Presentation",
        extension: "odp",
        media_type: "application/vnd.oasis.opendocument.presentation",
        store_filters: &[(Presentation, "impress8")],
        filter_options: None,
    },
    DocumentFormat {
        name: "Microsoft PowerPoint 2007-365",
        extension: "pptx",
        media_type: "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        store_filters: &[(Presentation, "Impress MS PowerPoint 2007 XML")],
        filter_options: None,
    },
    DocumentFormat {
        name: "OpenDocument Drawing",
        extension: "odg",
        media_type: "application/vnd.oasis.opendocument.graphics",
        store_filters: &[(Drawing, "draw8")],
        filter_options: None,
    },
    DocumentFormat {
        name: "Scalable Vector Graphics",
        extension: "svg",
        media_type: "image/svg+xml",
        store_filters: &[
            (Drawing, "draw_svg_Export"),
            (Presentation, "impress_svg_Export"),
        ],
        filter_options: None,
    },
];

/// Lookup table over the built-in formats.
pub struct FormatRegistry {
    formats: &'static [DocumentFormat],
}

static BUILTIN: LazyLock<FormatRegistry> = LazyLock::new(|| FormatRegistry { formats: FORMATS });

impl FormatRegistry {
    pub fn builtin() -> &'static FormatRegistry {
        &BUILTIN
    }

    /// Find a format by its extension, case-insensitively.
    pub fn by_extension(&self, extension: &str) -> Option<&DocumentFormat> {
        let extension = extension.trim_start_matches('.');
        self.formats
            .iter()
            .find(|f| f.extension.eq_ignore_ascii_case(extension))
    }

    pub fn formats(&self) -> &[DocumentFormat] {
        self.formats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pdf", Text, Some("writer_pdf_Export"))]
    #[case("pdf", Drawing, Some("draw_pdf_Export"))]
    #[case("PDF", Presentation, Some("impress_pdf_Export"))]
    #[case(".pdf", Spreadsheet, Some("calc_pdf_Export"))]
    #[case("odg", Drawing, Some("draw8"))]
    #[case("odg", Text, None)]
    #[case("docx", Text, Some("MS Word 2007 XML"))]
    fn store_filter_by_extension_and_family(
        #[case] ext: &str,
        #[case] family: DocumentFamily,
        #[case] expected: Option<&str>,
    ) {
        let format = FormatRegistry::builtin().by_extension(ext).unwrap();
        assert_eq!(format.store_filter(family), expected);
    }

    #[test]
    fn unknown_extension_is_absent() {
        assert!(FormatRegistry::builtin().by_extension("xyz").is_none());
    }

    #[test]
    fn csv_export_carries_filter_options() {
        let format = FormatRegistry::builtin().by_extension("csv").unwrap();
        let options = format.export_options(Spreadsheet).unwrap();
        assert_eq!(options.filter, "Text - txt - csv (StarCalc)");
        assert_eq!(
            options.properties.get("FilterOptions").unwrap(),
            "44,34,76"
        );
    }
}
