pub mod ton;
pub mod traits;
