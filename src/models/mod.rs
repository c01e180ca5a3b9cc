mod bag_softmax;

pub use bag_softmax::BagSoftmax;
