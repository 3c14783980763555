// ============================================================
// Layer 5 — ESG Classifier Model
// ============================================================
// Transformer encoder with a multi-label head:
//
//   input_ids [B, L] ──► token + position embeddings
//                        │
//                        ▼
//                   N × EncoderBlock (self-attention with the
//                        │            padding mask, GELU FFN)
//                        ▼
//                   masked mean pool over real tokens [B, D]
//                        │
//                        ▼
//                   Linear(D, C) → one logit per criterion
//
// Training loss is binary cross-entropy with logits, averaged
// over batch and criteria, where each criterion's positive
// term is scaled by its class weight:
//
//   ℓ = -[ w·y·log σ(z) + (1 - y)·log σ(-z) ]

use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, log_sigmoid},
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct EsgClassifierConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub num_labels:  usize,
    pub dropout:     f64,
}

impl EsgClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EsgClassifier<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let classifier = LinearConfig::new(self.d_model, self.num_labels).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        EsgClassifier {
            token_embedding, position_embedding, layers,
            final_norm, classifier, dropout,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask` is true at padding positions, which attention ignores.
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn_output = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_pad(pad_mask))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct EsgClassifier<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub classifier:         Linear<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> EsgClassifier<B> {
    /// input_ids, attention_mask: [batch, seq_len] → logits: [batch, num_labels]
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        let [batch_size, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let pad_mask = attention_mask.clone().equal_elem(0);
        let mut x = self.dropout.forward(tok_emb + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }
        let x = self.final_norm.forward(x); // [batch, seq_len, d_model]
        let [_, _, d_model] = x.dims();

        // Mean over real tokens only
        let mask   = attention_mask.float(); // [batch, seq_len]
        let counts = mask
            .clone()
            .sum_dim(1)
            .clamp_min(1.0)
            .unsqueeze_dim::<3>(2)
            .expand([batch_size, 1, d_model]);
        let mask   = mask.unsqueeze_dim::<3>(2).expand([batch_size, seq_len, d_model]);
        let pooled = ((x * mask).sum_dim(1) / counts).reshape([batch_size, d_model]);

        self.classifier.forward(self.dropout.forward(pooled))
    }

    /// Forward pass plus the class-weighted multi-label loss.
    pub fn forward_loss(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        targets:        Tensor<B, 2>,
        pos_weight:     Tensor<B, 1>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(input_ids, attention_mask);
        let loss   = weighted_bce_with_logits(logits.clone(), targets, pos_weight);
        (loss, logits)
    }
}

/// Mean binary cross-entropy with logits; `pos_weight[c]` scales the
/// positive term of criterion `c`.
pub fn weighted_bce_with_logits<B: Backend>(
    logits:     Tensor<B, 2>,
    targets:    Tensor<B, 2>,
    pos_weight: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let [batch_size, num_labels] = logits.dims();
    let weight = pos_weight.unsqueeze::<2>().expand([batch_size, num_labels]);

    let positive = log_sigmoid(logits.clone()) * targets.clone() * weight;
    let negative = log_sigmoid(logits.neg()) * targets.neg().add_scalar(1.0);
    (positive + negative).neg().mean()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray;

    fn tiny() -> EsgClassifierConfig {
        EsgClassifierConfig::new(50, 16, 8, 2, 2, 16, 3, 0.0)
    }

    fn scalar(t: Tensor<B, 1>) -> f32 {
        t.into_scalar().elem::<f32>()
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model  = tiny().init::<B>(&device);
        let ids    = Tensor::<B, 2, Int>::from_ints([[5, 6, 7, 1], [8, 9, 1, 1]], &device);
        let mask   = Tensor::<B, 2, Int>::from_ints([[1, 1, 1, 0], [1, 1, 0, 0]], &device);
        assert_eq!(model.forward(ids, mask).dims(), [2, 3]);
    }

    #[test]
    fn test_padding_does_not_change_logits() {
        let device = Default::default();
        let model  = tiny().init::<B>(&device);

        // Same real tokens, different pad ids behind the mask
        let mask = Tensor::<B, 2, Int>::from_ints([[1, 1, 0, 0]], &device);
        let a = model.forward(Tensor::from_ints([[5, 6, 1, 1]], &device), mask.clone());
        let b = model.forward(Tensor::from_ints([[5, 6, 40, 41]], &device), mask);
        a.into_data().assert_approx_eq(&b.into_data(), 4);
    }

    #[test]
    fn test_bce_matches_closed_form() {
        let device  = Default::default();
        let logits  = Tensor::<B, 2>::from_floats([[0.0, 0.0]], &device);
        let targets = Tensor::<B, 2>::from_floats([[1.0, 0.0]], &device);
        let ones    = Tensor::<B, 1>::from_floats([1.0, 1.0], &device);
        // σ(0) = 0.5 → each term is ln 2
        let loss = scalar(weighted_bce_with_logits(logits, targets, ones));
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_positive_weight_scales_positive_term_only() {
        let device  = Default::default();
        let logits  = Tensor::<B, 2>::from_floats([[0.3, -1.2]], &device);
        let targets = Tensor::<B, 2>::from_floats([[1.0, 0.0]], &device);

        let unweighted = scalar(weighted_bce_with_logits(
            logits.clone(), targets.clone(), Tensor::from_floats([1.0, 1.0], &device),
        ));
        let weighted = scalar(weighted_bce_with_logits(
            logits, targets, Tensor::from_floats([3.0, 3.0], &device),
        ));

        // Only the positive term triples; the mean is over 2 entries
        let pos_term = (1.0 + (-0.3f32).exp()).ln();
        assert!((weighted - unweighted - pos_term).abs() < 1e-5);
    }

    #[test]
    fn test_forward_loss_is_finite() {
        let device  = Default::default();
        let model   = tiny().init::<B>(&device);
        let ids     = Tensor::<B, 2, Int>::from_ints([[5, 6, 7, 1]], &device);
        let mask    = Tensor::<B, 2, Int>::from_ints([[1, 1, 1, 0]], &device);
        let targets = Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 0.0, 1.0], [1, 3]), &device);
        let weights = Tensor::<B, 1>::from_floats([2.0, 1.0, 1.0], &device);
        let (loss, logits) = model.forward_loss(ids, mask, targets, weights);
        assert!(scalar(loss).is_finite());
        assert_eq!(logits.dims(), [1, 3]);
    }
}
