pub mod pdf_document_converter;
