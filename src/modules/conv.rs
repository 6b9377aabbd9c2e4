use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::PaddingConfig1d;
use burn::tensor::{backend::Backend, Tensor};

/// Length preserving 1-D convolution over time-major `[batch, steps, channels]` input.
#[derive(Module, Debug)]
pub struct SameConv1d<B: Backend> {
    conv: Conv1d<B>,
}

impl<B: Backend> SameConv1d<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.conv.forward(x.swap_dims(1, 2)).swap_dims(1, 2)
    }
}

#[derive(Config, Debug)]
pub struct SameConv1dConfig {
    d_input: usize,
    d_output: usize,
    kernel_size: usize,

    #[config(default = 1)]
    dilation: usize,
}

impl SameConv1dConfig {
    pub fn init<B: Backend>(&self) -> SameConv1d<B> {
        assert!(
            self.kernel_size % 2 == 1,
            "kernel size must be odd to keep the sequence length, got {}",
            self.kernel_size
        );
        assert!(self.dilation > 0);

        let padding = self.dilation * (self.kernel_size - 1) / 2;
        let conv = Conv1dConfig::new(self.d_input, self.d_output, self.kernel_size)
            .with_dilation(self.dilation)
            .with_padding(PaddingConfig1d::Explicit(padding))
            .init();

        SameConv1d { conv }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn dilated_convolution_keeps_length() {
        let device = Default::default();
        let x = float_tensor::<TestBackend, 3>((0..42).map(|v| v as f32).collect(), [2, 7, 3], &device);

        for dilation in [1, 2, 4] {
            let conv: SameConv1d<TestBackend> = SameConv1dConfig::new(3, 5, 3).with_dilation(dilation).init();
            assert_eq!(conv.forward(x.clone()).dims(), [2, 7, 5]);
        }
    }

    #[test]
    #[should_panic]
    fn even_kernels_are_rejected() {
        let _conv: SameConv1d<TestBackend> = SameConv1dConfig::new(3, 5, 2).init();
    }
}
