mod error;
mod param_gen;
mod random;
mod spec;

pub use error::RandErr;
pub use param_gen::{ConstParamGen, ParamGen};
pub use random::RandParamGen;
pub use spec::ParamInit;
