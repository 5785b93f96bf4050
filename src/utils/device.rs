//! Candle device and dtype selection.

use crate::core::PreferenceError;
use candle_core::{DType, Device};

#[cfg(not(feature = "cuda"))]
fn cuda_not_enabled() -> PreferenceError {
    PreferenceError::config_error("CUDA support not enabled. Compile with --features cuda")
}

/// Parses a device string and creates a Candle [`Device`].
///
/// # Supported formats
///
/// - `"cpu"` → CPU device
/// - `"cuda"` or `"gpu"` → CUDA device 0
/// - `"cuda:N"` → CUDA device N (e.g., `"cuda:1"`)
///
/// # Errors
///
/// Returns an error if the string is not recognized, if CUDA is requested but
/// the `cuda` feature is not enabled, or if device creation fails.
pub fn parse_device(device_str: &str) -> Result<Device, PreferenceError> {
    let device_str = device_str.to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0).map_err(|e| {
                    PreferenceError::config_error(format!("Failed to create CUDA device: {e}"))
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        s if s.starts_with("cuda:") => {
            let ordinal: usize = s["cuda:".len()..].parse().map_err(|_| {
                PreferenceError::config_error(format!("Invalid CUDA device ordinal in '{s}'"))
            })?;
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(ordinal).map_err(|e| {
                    PreferenceError::config_error(format!(
                        "Failed to create CUDA device {ordinal}: {e}"
                    ))
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                let _ = ordinal;
                Err(cuda_not_enabled())
            }
        }
        _ => Err(PreferenceError::config_error(format!(
            "Unknown device: '{device_str}'. Use 'cpu', 'cuda', or 'cuda:N'"
        ))),
    }
}

/// Parses a precision name into a Candle [`DType`].
///
/// Accepts `bf16`/`bfloat16`, `f16`/`float16`/`half`, and `f32`/`float32`.
pub fn parse_dtype(dtype_str: &str) -> Result<DType, PreferenceError> {
    match dtype_str.to_lowercase().as_str() {
        "bf16" | "bfloat16" => Ok(DType::BF16),
        "f16" | "float16" | "half" => Ok(DType::F16),
        "f32" | "float32" | "float" => Ok(DType::F32),
        other => Err(PreferenceError::config_error(format!(
            "Unknown dtype: '{other}'. Use 'bf16', 'f16', or 'f32'"
        ))),
    }
}
