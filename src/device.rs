//! Host capability detection and backend resolution.
//!
//! [`detect`] probes the host once per process and caches the result. The
//! descriptor is only used to fill in a device or precision the modality
//! configuration leaves unset; an explicit device always wins, except that a
//! GPU request on a host without accelerated compute falls back to the
//! portable [`Device::Wasm`] path.

use crate::api::{DType, Device, ModalityConfig};
use std::sync::OnceLock;

/// Detected execution features of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Whether GPU-accelerated compute can be used.
    pub accelerated_compute_available: bool,
    /// Precision to load weights with when the configuration does not say.
    pub preferred_precision: DType,
}

impl CapabilityDescriptor {
    /// The descriptor reported when detection fails: no acceleration, full
    /// precision.
    pub const fn conservative() -> Self {
        Self {
            accelerated_compute_available: false,
            preferred_precision: DType::Fp32,
        }
    }

    /// Descriptor for a host with accelerated compute.
    pub const fn accelerated() -> Self {
        Self {
            accelerated_compute_available: true,
            preferred_precision: DType::Fp16,
        }
    }
}

static CAPABILITIES: OnceLock<CapabilityDescriptor> = OnceLock::new();

/// Return the host's capability descriptor, probing on first call only.
///
/// Never fails: a probe error or panic is reported as
/// [`CapabilityDescriptor::conservative`].
pub fn detect() -> CapabilityDescriptor {
    *CAPABILITIES.get_or_init(|| {
        let outcome = std::panic::catch_unwind(probe_accelerated_compute)
            .unwrap_or_else(|_| Err("capability probe panicked".to_string()));
        let descriptor = descriptor_from_probe(outcome);
        tracing::info!(
            accelerated = descriptor.accelerated_compute_available,
            precision = %descriptor.preferred_precision,
            "Detected host compute capabilities"
        );
        descriptor
    })
}

/// Map a raw probe outcome onto a descriptor.
pub(crate) fn descriptor_from_probe(
    outcome: std::result::Result<bool, String>,
) -> CapabilityDescriptor {
    match outcome {
        Ok(true) => CapabilityDescriptor::accelerated(),
        Ok(false) => CapabilityDescriptor::conservative(),
        Err(e) => {
            tracing::warn!(error = %e, "Capability probe failed; assuming no acceleration");
            CapabilityDescriptor::conservative()
        }
    }
}

#[cfg(feature = "provider-candle")]
fn probe_accelerated_compute() -> std::result::Result<bool, String> {
    if candle_core::utils::cuda_is_available() {
        return match candle_core::Device::new_cuda(0) {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "CUDA compiled in but no usable device");
                Ok(false)
            }
        };
    }
    if candle_core::utils::metal_is_available() {
        return match candle_core::Device::new_metal(0) {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "Metal compiled in but no usable device");
                Ok(false)
            }
        };
    }
    Ok(false)
}

#[cfg(not(feature = "provider-candle"))]
fn probe_accelerated_compute() -> std::result::Result<bool, String> {
    Ok(false)
}

/// Concrete backend chosen for one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub device: Device,
    pub dtype: DType,
    /// `true` when the requested device was unavailable and a fallback was
    /// chosen instead.
    pub fell_back: bool,
}

/// Pick the device and precision for `config` on a host described by `caps`.
pub fn resolve_backend(config: &ModalityConfig, caps: &CapabilityDescriptor) -> ResolvedBackend {
    let requested = config.device.unwrap_or(if caps.accelerated_compute_available {
        Device::Gpu
    } else {
        Device::Cpu
    });

    let (device, fell_back) = if requested == Device::Gpu && !caps.accelerated_compute_available {
        tracing::warn!(
            model = %config.model,
            "Accelerated compute unavailable; falling back to wasm backend"
        );
        (Device::Wasm, true)
    } else {
        (requested, false)
    };

    ResolvedBackend {
        device,
        dtype: config.dtype.unwrap_or(caps.preferred_precision),
        fell_back,
    }
}
