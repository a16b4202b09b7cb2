pub mod codes;
pub mod outputs;
pub mod vocabulary;

pub use codes::*;
pub use outputs::*;
pub use vocabulary::*;
