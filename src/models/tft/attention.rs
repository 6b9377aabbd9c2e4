use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

/// Multi-head attention whose heads share one value projection and whose outputs are
/// averaged instead of concatenated, so every head stays interpretable in the same
/// value space.
#[derive(Module, Debug)]
pub struct InterpretableMultiHead<B: Backend> {
    query_layers: Vec<Linear<B>>,
    key_layers: Vec<Linear<B>>,
    value_layer: Linear<B>,
    output_layer: Linear<B>,
    d_head: usize,
}

impl<B: Backend> InterpretableMultiHead<B> {
    /// `query [batch, l_q, d_model]`, `key`/`value [batch, l_k, d_model]`, output
    /// `[batch, l_q, d_model]`.
    pub fn forward(&self, query: Tensor<B, 3>, key: Tensor<B, 3>, value: Tensor<B, 3>) -> Tensor<B, 3> {
        self.forward_with_weights(query, key, value).0
    }

    /// Also returns the attention weights of every head, `[batch, n_head, l_q, l_k]`.
    pub fn forward_with_weights(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
    ) -> (Tensor<B, 3>, Tensor<B, 4>) {
        let n_head = self.query_layers.len();
        let scale = (self.d_head as f32).powf(-0.5);
        let value = self.value_layer.forward(value);

        let mut output: Option<Tensor<B, 3>> = None;
        let mut weights = Vec::with_capacity(n_head);

        for (q_layer, k_layer) in self.query_layers.iter().zip(self.key_layers.iter()) {
            let q = q_layer.forward(query.clone());
            let k = k_layer.forward(key.clone());

            let scores = q.matmul(k.swap_dims(1, 2)) * scale;
            let wei = activation::softmax(scores, 2);
            let head = wei.clone().matmul(value.clone());

            output = Some(match output {
                Some(sum) => sum + head,
                None => head,
            });
            weights.push(wei);
        }

        let output = match output {
            Some(sum) => sum / n_head as f32,
            None => unreachable!("attention is built with at least one head"),
        };

        (self.output_layer.forward(output), Tensor::stack(weights, 1))
    }
}

#[derive(Config, Debug)]
pub struct InterpretableMultiHeadConfig {
    d_model: usize,
    d_head: usize,
    n_head: usize,
}

impl InterpretableMultiHeadConfig {
    pub fn init<B: Backend>(&self) -> InterpretableMultiHead<B> {
        assert!(self.n_head > 0, "attention needs at least one head");
        assert!(self.d_head > 0, "head size must be positive");

        let projection = || LinearConfig::new(self.d_model, self.d_head).init();

        InterpretableMultiHead {
            query_layers: (0..self.n_head).map(|_| projection()).collect(),
            key_layers: (0..self.n_head).map(|_| projection()).collect(),
            value_layer: projection(),
            output_layer: LinearConfig::new(self.d_head, self.d_model).init(),
            d_head: self.d_head,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn sequence(shape: [usize; 3], phase: f32) -> Tensor<TestBackend, 3> {
        let len = shape.iter().product();
        let values = (0..len).map(|v| (v as f32 * 0.41 + phase).sin()).collect();
        float_tensor(values, shape, &Default::default())
    }

    #[test]
    fn single_head_is_scaled_dot_product_attention() {
        let attention: InterpretableMultiHead<TestBackend> =
            InterpretableMultiHeadConfig::new(6, 4, 1).init();
        let query = sequence([2, 3, 6], 0.0);
        let memory = sequence([2, 5, 6], 0.7);

        let output = attention.forward(query.clone(), memory.clone(), memory.clone());

        let q = attention.query_layers[0].forward(query);
        let k = attention.key_layers[0].forward(memory.clone());
        let v = attention.value_layer.forward(memory);
        let wei = activation::softmax(q.matmul(k.swap_dims(1, 2)) / 2.0, 2);
        let expected = attention.output_layer.forward(wei.matmul(v));

        assert_eq!(output.dims(), [2, 3, 6]);
        let diff = (output - expected).abs().max().into_data().convert::<f32>().value[0];
        assert!(diff < 1e-6);
    }

    #[test]
    fn heads_average_into_model_width() {
        let attention: InterpretableMultiHead<TestBackend> =
            InterpretableMultiHeadConfig::new(8, 3, 4).init();
        let query = sequence([2, 4, 8], 0.0);
        let memory = sequence([2, 7, 8], 1.3);

        let (output, weights) = attention.forward_with_weights(query, memory.clone(), memory);

        assert_eq!(output.dims(), [2, 4, 8]);
        assert_eq!(weights.dims(), [2, 4, 4, 7]);
        let sums = weights.sum_dim(3).into_data().convert::<f32>().value;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }
}
