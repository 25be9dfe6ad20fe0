pub mod errors;
pub mod objective;
pub mod space;

pub use errors::*;
pub use objective::*;
pub use space::*;
