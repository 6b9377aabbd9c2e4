use burn::config::Config;
use burn::module::Module;
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

#[derive(Config, Debug, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
    Gelu,
    Elu,
    Selu,
    Tanh,
    Sigmoid,
}

// Module fields hold the position in this table.
static KINDS: [ActivationKind; 6] = [
    ActivationKind::Relu,
    ActivationKind::Gelu,
    ActivationKind::Elu,
    ActivationKind::Selu,
    ActivationKind::Tanh,
    ActivationKind::Sigmoid,
];

impl ActivationKind {
    fn index(&self) -> usize {
        match self {
            ActivationKind::Relu => 0,
            ActivationKind::Gelu => 1,
            ActivationKind::Elu => 2,
            ActivationKind::Selu => 3,
            ActivationKind::Tanh => 4,
            ActivationKind::Sigmoid => 5,
        }
    }
}

/// Exponential linear unit, `x` above zero and `alpha * (exp(x) - 1)` below.
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>, alpha: f32) -> Tensor<B, D> {
    let negative = x.clone().lower_equal_elem(0.0);
    let saturated = x.clone().exp().sub_scalar(1.0).mul_scalar(alpha);

    x.mask_where(negative, saturated)
}

#[derive(Module, Debug, Clone)]
pub struct Activation {
    kind: usize,
    alpha: f32,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self.kind() {
            ActivationKind::Relu => activation::relu(x),
            ActivationKind::Gelu => activation::gelu(x),
            ActivationKind::Elu => elu(x, self.alpha),
            ActivationKind::Selu => elu(x, self.alpha).mul_scalar(SELU_SCALE),
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Sigmoid => activation::sigmoid(x),
        }
    }

    pub fn kind(&self) -> &ActivationKind {
        KINDS
            .get(self.kind)
            .unwrap_or_else(|| unreachable!("activation index {} out of range", self.kind))
    }
}

#[derive(Config, Debug)]
pub struct ActivationConfig {
    #[config(default = "ActivationKind::Relu")]
    kind: ActivationKind,
}

impl ActivationConfig {
    pub fn init(&self) -> Activation {
        let alpha = if self.kind == ActivationKind::Selu {
            SELU_ALPHA
        } else {
            1.0
        };

        Activation {
            kind: self.kind.index(),
            alpha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::NdArray;

    fn apply(kind: ActivationKind, values: Vec<f32>) -> Vec<f32> {
        let device = Default::default();
        let len = values.len();
        let x = float_tensor::<NdArray, 1>(values, [len], &device);
        ActivationConfig::new()
            .with_kind(kind)
            .init()
            .forward(x)
            .into_data()
            .convert::<f32>()
            .value
    }

    #[test]
    fn relu_clips_negatives() {
        assert_eq!(apply(ActivationKind::Relu, vec![-1.0, 3.0]), vec![0.0, 3.0]);
    }

    #[test]
    fn selu_scales_positive_inputs() {
        let y = apply(ActivationKind::Selu, vec![1.0, -1.0]);
        assert!((y[0] - SELU_SCALE).abs() < 1e-6);
        assert!(y[1] < 0.0);
    }

    #[test]
    fn elu_is_identity_above_zero_and_saturates_below() {
        let y = apply(ActivationKind::Elu, vec![2.0, 0.0, -1.0, -50.0]);

        assert_eq!(y[0], 2.0);
        assert_eq!(y[1], 0.0);
        assert!((y[2] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert!((y[3] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn every_kind_is_stored_and_recovered() {
        for kind in KINDS.iter() {
            let activation = ActivationConfig::new().with_kind(kind.clone()).init();
            assert_eq!(activation.kind(), kind);
        }
    }

    #[test]
    fn tanh_and_gelu_are_distinct() {
        let tanh = apply(ActivationKind::Tanh, vec![1.0]);
        let gelu = apply(ActivationKind::Gelu, vec![1.0]);

        assert!((tanh[0] - 1.0f32.tanh()).abs() < 1e-6);
        assert!((gelu[0] - 0.841_344_7).abs() < 1e-3);
    }

    #[test]
    fn sigmoid_is_centered() {
        let y = apply(ActivationKind::Sigmoid, vec![0.0]);
        assert!((y[0] - 0.5).abs() < 1e-6);
    }
}
