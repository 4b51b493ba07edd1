//! Transient notifications reporting the outcome of a mutation.

use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
  Loading,
  Success,
  Error,
}

impl ToastKind {
  /// Message-catalog key for this outcome
  pub fn as_str(&self) -> &'static str {
    match self {
      ToastKind::Loading => "loading",
      ToastKind::Success => "success",
      ToastKind::Error => "error",
    }
  }
}

/// Sink for toasts. The CLI prints them; a UI would render them.
pub trait Toaster: Send + Sync {
  fn toast(&self, kind: ToastKind, message: &str);
}

/// Writes toasts to stderr so they never mix with command output.
#[derive(Debug, Default)]
pub struct ConsoleToaster {
  /// Skip "loading" toasts (useful when output is piped)
  pub quiet: bool,
}

impl Toaster for ConsoleToaster {
  fn toast(&self, kind: ToastKind, message: &str) {
    match kind {
      ToastKind::Loading => {
        if !self.quiet {
          eprintln!("… {}", message);
        }
      }
      ToastKind::Success => {
        info!(toast = message, "mutation succeeded");
        eprintln!("✓ {}", message);
      }
      ToastKind::Error => {
        error!(toast = message, "mutation failed");
        eprintln!("✗ {}", message);
      }
    }
  }
}

#[cfg(test)]
pub mod testing {
  use super::*;
  use std::sync::Mutex;

  /// Keeps every toast for assertions.
  #[derive(Debug, Default)]
  pub struct RecordingToaster {
    toasts: Mutex<Vec<(ToastKind, String)>>,
  }

  impl RecordingToaster {
    pub fn toasts(&self) -> Vec<(ToastKind, String)> {
      self.toasts.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<ToastKind> {
      self.toasts().into_iter().map(|(kind, _)| kind).collect()
    }
  }

  impl Toaster for RecordingToaster {
    fn toast(&self, kind: ToastKind, message: &str) {
      self.toasts.lock().unwrap().push((kind, message.to_string()));
    }
  }
}
