use ndarray::ArrayViewMutD;

/// Writes initial values into a parameter tensor.
pub trait ParamGen {
    fn fill(&mut self, tensor: ArrayViewMutD<'_, f32>);
}

/// Fills every element with the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstParamGen(pub f32);

impl ParamGen for ConstParamGen {
    fn fill(&mut self, mut tensor: ArrayViewMutD<'_, f32>) {
        tensor.fill(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn overwrites_every_element() {
        let mut tensor = ArrayD::from_elem(IxDyn(&[2, 2]), 3.);
        ConstParamGen(-1.).fill(tensor.view_mut());
        assert!(tensor.iter().all(|&x| x == -1.));
    }
}
