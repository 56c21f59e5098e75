//! Backend selection and per-call strategy resolution.

use std::fmt;
use std::str::FromStr;

use natten_tensor::{DType, Precision};
use serde::{Deserialize, Serialize};

use crate::device::{ComputeDevice, Location};
use crate::error::{NattenError, Result};

/// Family of a compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Cuda,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Cpu => "cpu",
            BackendKind::Cuda => "cuda",
        })
    }
}

/// A concrete backend a caller can ask for, e.g. `"cpu"` or `"cuda:1"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Backend {
    #[default]
    Cpu,
    Cuda {
        ordinal: usize,
    },
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Cpu => BackendKind::Cpu,
            Backend::Cuda { .. } => BackendKind::Cuda,
        }
    }

    pub fn location(&self) -> Location {
        match *self {
            Backend::Cpu => Location::Host,
            Backend::Cuda { ordinal } => Location::Cuda(ordinal),
        }
    }

    /// Whether kernels for this backend were compiled into the crate.
    pub fn is_compiled(&self) -> bool {
        match self {
            Backend::Cpu => true,
            Backend::Cuda { .. } => cfg!(feature = "cuda"),
        }
    }

    pub fn ensure_available(&self) -> Result<()> {
        if self.is_compiled() {
            Ok(())
        } else {
            Err(NattenError::UnsupportedBackend {
                backend: self.to_string(),
                reason: "natten-compute was built without the `cuda` feature".into(),
            })
        }
    }

    /// Ordinal of a CUDA backend that was compiled in.
    ///
    /// Devices are acquired through this, so requesting an accelerator the
    /// crate was built without fails before any device call is made.
    pub fn cuda_ordinal(&self) -> Result<usize> {
        self.ensure_available()?;
        match *self {
            Backend::Cuda { ordinal } => Ok(ordinal),
            Backend::Cpu => Err(NattenError::UnsupportedBackend {
                backend: self.to_string(),
                reason: "not a cuda backend".into(),
            }),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu => f.write_str("cpu"),
            Backend::Cuda { ordinal } => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl FromStr for Backend {
    type Err = NattenError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Backend::Cpu),
            "cuda" => Ok(Backend::Cuda { ordinal: 0 }),
            _ => s
                .strip_prefix("cuda:")
                .and_then(|n| n.parse().ok())
                .map(|ordinal| Backend::Cuda { ordinal })
                .ok_or_else(|| NattenError::InvalidBackend(s.clone())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = NattenError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Backend> for String {
    fn from(b: Backend) -> String {
        b.to_string()
    }
}

/// How one call will execute, fixed before any kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub backend: BackendKind,
    pub precision: Precision,
    pub dtype: DType,
}

impl Strategy {
    pub fn resolve<D: ComputeDevice>(dev: &D, dtype: DType) -> Result<Self> {
        let backend = dev.kind();
        if !dev.supports(dtype) {
            return Err(NattenError::UnsupportedDtype { backend, dtype });
        }
        Ok(Self {
            backend,
            precision: dtype.precision(),
            dtype,
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = match self.precision {
            Precision::Full => "full",
            Precision::Reduced => "reduced",
        };
        write!(f, "{}/{} ({precision})", self.backend, self.dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backends() {
        assert_eq!("cpu".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!("CUDA".parse::<Backend>().unwrap(), Backend::Cuda { ordinal: 0 });
        assert_eq!("cuda:3".parse::<Backend>().unwrap(), Backend::Cuda { ordinal: 3 });
        assert!(matches!(
            "metal".parse::<Backend>(),
            Err(NattenError::InvalidBackend(_))
        ));
        assert!("cuda:x".parse::<Backend>().is_err());
    }

    #[test]
    fn display_roundtrips() {
        for b in [Backend::Cpu, Backend::Cuda { ordinal: 2 }] {
            assert_eq!(b.to_string().parse::<Backend>().unwrap(), b);
        }
    }

    #[test]
    fn serde_as_string() {
        let b: Backend = serde_json::from_str("\"cuda:1\"").unwrap();
        assert_eq!(b, Backend::Cuda { ordinal: 1 });
        assert_eq!(serde_json::to_string(&Backend::Cpu).unwrap(), "\"cpu\"");
    }

    #[test]
    fn cuda_ordinal_requires_cuda_backend() {
        assert!(matches!(
            Backend::Cpu.cuda_ordinal(),
            Err(NattenError::UnsupportedBackend { .. })
        ));
        let cuda = Backend::Cuda { ordinal: 2 };
        if cfg!(feature = "cuda") {
            assert_eq!(cuda.cuda_ordinal().unwrap(), 2);
        } else {
            assert!(matches!(
                cuda.cuda_ordinal(),
                Err(NattenError::UnsupportedBackend { .. })
            ));
        }
    }

    #[test]
    fn cpu_always_available() {
        assert!(Backend::Cpu.ensure_available().is_ok());
        assert_eq!(Backend::Cpu.location(), Location::Host);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn cuda_unavailable_without_feature() {
        let err = Backend::Cuda { ordinal: 0 }.ensure_available().unwrap_err();
        assert!(matches!(err, NattenError::UnsupportedBackend { .. }));
        assert!(err.to_string().contains("cuda:0"));
    }
}
