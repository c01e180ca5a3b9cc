mod spec;
mod store;
mod view;

pub use spec::{ParamId, ParamSpec};
pub use store::ParameterStore;
pub use view::ParameterView;

pub(crate) use store::ParameterSlot;
