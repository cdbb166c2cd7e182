pub mod seed;
pub mod store;
pub mod traits;

pub use seed::{SeedBoard, SeedData, SeedList, SeedSummary, SeedUser};
pub use store::*;
pub use traits::*;
