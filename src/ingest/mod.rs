pub mod element;
pub mod indexer;
pub mod parsers;
pub mod scanner;
pub mod segmenter;
pub mod splitter;

pub use element::{ContentElement, ElementCategory, Metadata};
pub use indexer::{is_binary_extension, IndexReport, Indexer, BINARY_EXTENSIONS};
pub use parsers::{DocumentParser, ParseMode, ParserRegistry};
pub use scanner::{find_files, scan_directory};
pub use segmenter::{segment_elements, segment_file, StructuredRecord};
pub use splitter::TextSplitter;
