//! Shape checks specific to the split-K decoder kernel.

use crate::config::DecoderLimits;
use crate::inputs::Inputs;
use crate::tensor::Tensor;

/// Append every decoder-specific reason `inp` cannot run.
///
/// Only meaningful for the padded-keys bias; any other bias has already been
/// rejected by the base check, so nothing is added for it. Uses checked
/// indexing throughout so malformed ranks produce reasons, not panics.
pub(super) fn decoder_reasons<T: Tensor>(
    limits: &DecoderLimits,
    inp: &Inputs<T>,
    reasons: &mut Vec<String>,
) {
    let Some(mask) = inp.attn_bias.as_padded_keys() else {
        return;
    };
    let (query, key, value) = (&inp.query, &inp.key, &inp.value);

    if query.ndim() != 4 || key.ndim() != 4 {
        reasons.push("Inputs must be BMHK. BMK not supported".to_string());
    }

    if let Some(&batch) = query.shape().first() {
        if batch != 1 {
            reasons.push(format!("One formal batch element expected; got {batch}"));
        }
    }

    if let Some(&head_dim) = query.shape().last() {
        if head_dim == 0 {
            reasons.push("head_dim must be positive".to_string());
        }
        if head_dim > limits.max_head_dim {
            reasons.push(format!(
                "Got head_dim={head_dim}; only head_dim<={} is supported for now.",
                limits.max_head_dim
            ));
        }
        if limits.head_dim_multiple > 0 && head_dim % limits.head_dim_multiple != 0 {
            reasons.push(format!(
                "Got head_dim={head_dim}; it needs to be divisible by {}",
                limits.head_dim_multiple
            ));
        }
    }

    if key.last_stride() != Some(1) {
        reasons.push("expect keys to have last dim contiguous".to_string());
    }
    if value.last_stride() != Some(1) {
        reasons.push("expect values to have last dim contiguous".to_string());
    }

    let padding = mask.k_seqinfo.padding();
    let declared = mask.q_seqinfo.num_sequences();
    if padding == 0 {
        reasons.push("key padding must be positive".to_string());
    } else if let Some(&kv_len) = key.shape().get(1) {
        if kv_len % padding != 0 {
            reasons.push(format!(
                "key length {kv_len} is not a multiple of key padding {padding}"
            ));
        }
        let bsz = kv_len / padding;
        if bsz != declared {
            reasons.push("empty lanes not supported yet".to_string());
        }
        if bsz == 0 {
            reasons.push("batch has no sequences".to_string());
        } else if let Some(&q_len) = query.shape().get(1) {
            if q_len % bsz == 0 {
                let per_seq = q_len / bsz;
                if !is_uniform(mask.q_seqinfo.seqstart(), per_seq) {
                    reasons.push(format!(
                        "query seqstart {:?} does not give every sequence {per_seq} tokens",
                        mask.q_seqinfo.seqstart()
                    ));
                }
            } else {
                reasons.push(format!(
                    "query tokens ({q_len}) not evenly divisible across {bsz} sequences"
                ));
            }
        }
    }

    let with_lengths = mask.k_seqinfo.num_sequences();
    if with_lengths != declared {
        reasons.push(format!(
            "{with_lengths} key sequence lengths for {declared} query sequences"
        ));
    }

    if padding > limits.max_padding {
        reasons.push(format!("key padding exceeds {}", limits.max_padding));
    }
}

/// Whether `seqstart` is exactly `[0, n, 2n, ..]`.
fn is_uniform(seqstart: &[i32], n: usize) -> bool {
    seqstart
        .iter()
        .enumerate()
        .all(|(i, &start)| usize::try_from(start).is_ok_and(|start| start == i * n))
}
