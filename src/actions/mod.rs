pub mod cache;
pub mod formations;
pub mod health;
pub mod recognize;
pub mod sync;
pub mod ws;

pub use cache::*;
pub use formations::*;
pub use health::*;
pub use recognize::*;
pub use sync::*;
pub use ws::*;
