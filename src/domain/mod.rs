pub mod account;
pub mod budget;
pub mod cycle;
pub mod halt;
pub mod order;
pub mod outcome;

pub use account::*;
pub use budget::*;
pub use cycle::*;
pub use halt::*;
pub use order::*;
pub use outcome::*;
