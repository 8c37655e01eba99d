pub mod section;
pub mod descriptor;
pub mod pat;
pub mod pmt;
pub mod cat;
pub mod tracker;

pub use section::{crc32, SectionFilter};
pub use descriptor::{CaDescriptor, Descriptor};
pub use pat::{parse_pat, PatEntry, PatSection};
pub use pmt::{parse_pmt, PmtSection, PmtStream};
pub use cat::{parse_cat, CatSection};
pub use tracker::{TableEvent, TableTracker};
