use flashpipe::{Array, DataType, KernelElement};
use half::{bf16, f16};
use ndarray::Array4;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Shape and element type of one attention problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemShape {
    pub batch_size: usize,
    pub q_seq_len: usize,
    pub kv_seq_len: usize,
    pub num_q_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub data_type: DataType,
}

impl ProblemShape {
    /// Uniform q, k and v in `[-0.5, 0.5)`.
    pub fn random_inputs(
        &self,
        seed: u64,
    ) -> Result<(Array, Array, Array), String> {
        let q_shape = [self.batch_size, self.q_seq_len, self.num_q_heads, self.head_dim];
        let kv_shape = [self.batch_size, self.kv_seq_len, self.num_kv_heads, self.head_dim];
        let mut rng = StdRng::seed_from_u64(seed);
        let q = random_array(q_shape, self.data_type, &mut rng, "q")?;
        let k = random_array(kv_shape, self.data_type, &mut rng, "k")?;
        let v = random_array(kv_shape, self.data_type, &mut rng, "v")?;
        Ok((q, k, v))
    }
}

fn random_array(
    shape: [usize; 4],
    data_type: DataType,
    rng: &mut StdRng,
    label: &str,
) -> Result<Array, String> {
    match data_type {
        DataType::F16 => Ok(random_typed::<f16>(shape, rng, label)),
        DataType::BF16 => Ok(random_typed::<bf16>(shape, rng, label)),
        other => Err(format!("Cannot generate {other} inputs, expected f16 or bf16")),
    }
}

fn random_typed<T: KernelElement>(
    shape: [usize; 4],
    rng: &mut StdRng,
    label: &str,
) -> Array {
    let values = Array4::from_shape_fn(shape, |_| T::narrow(rng.random_range(-0.5..0.5)));
    Array::from_view(values.view(), label)
}
