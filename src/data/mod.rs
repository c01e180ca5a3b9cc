mod dataloader;
mod dataset;
mod json;
mod source;

pub use dataloader::DataLoader;
pub use dataset::{Bag, InMemoryDataset, Instance, NA_REL};
pub use json::{BagMode, JsonLoader};
pub use source::DataSource;
