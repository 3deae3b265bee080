//! Per-byte arithmetic transforms.

use super::Stage;
use crate::core::{ArtifactDescriptor, Outcome, StageDescriptor};
use crate::errors::Result;
use std::io::Write;
use tracing::debug;

/// The operation applied to every byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    /// Wrapping addition of a constant.
    Add,
    /// Wrapping multiplication by a constant.
    Multiply,
    /// Left shift by 0 to 7 bits.
    ShiftLeft,
}

impl ArithmeticOp {
    /// Registry id of the stage performing this operation.
    #[must_use]
    pub const fn processor_id(self) -> &'static str {
        match self {
            Self::Add => "transform.add",
            Self::Multiply => "transform.multiply",
            Self::ShiftLeft => "transform.shift",
        }
    }

    fn parse_operand(self, data: &str) -> std::result::Result<u8, String> {
        let value: i64 = data
            .parse()
            .map_err(|_| format!("'{data}' is not an integer"))?;
        match self {
            Self::ShiftLeft if !(0..=7).contains(&value) => {
                Err(format!("shift distance {value} is outside 0..=7"))
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            _ => Ok(value.rem_euclid(256) as u8),
        }
    }

    const fn apply(self, byte: u8, operand: u8) -> u8 {
        match self {
            Self::Add => byte.wrapping_add(operand),
            Self::Multiply => byte.wrapping_mul(operand),
            Self::ShiftLeft => byte << operand,
        }
    }
}

/// Applies an [`ArithmeticOp`] with a constant parsed from the stage data.
#[derive(Debug)]
pub struct ArithmeticStage {
    op: ArithmeticOp,
    operand: Option<u8>,
    scratch: Vec<u8>,
}

impl ArithmeticStage {
    /// Creates an unconfigured stage.
    #[must_use]
    pub const fn new(op: ArithmeticOp) -> Self {
        Self {
            op,
            operand: None,
            scratch: Vec::new(),
        }
    }

    /// The configured operand, once initialized.
    #[must_use]
    pub const fn operand(&self) -> Option<u8> {
        self.operand
    }
}

impl Stage for ArithmeticStage {
    fn initialize(&mut self, descriptor: &StageDescriptor, _context: &ArtifactDescriptor) -> Outcome {
        let Some(data) = descriptor.data() else {
            return Outcome::config_problem(
                descriptor.required,
                format!("{} requires an operand", self.op.processor_id()),
            );
        };
        match self.op.parse_operand(data) {
            Ok(operand) => {
                debug!(processor_id = self.op.processor_id(), operand, "Arithmetic stage configured");
                self.operand = Some(operand);
                Outcome::ok()
            }
            Err(reason) => Outcome::config_problem(
                descriptor.required,
                format!("Invalid operand for {}: {reason}", self.op.processor_id()),
            ),
        }
    }

    fn is_enabled(&self) -> bool {
        self.operand.is_some()
    }

    fn write(&mut self, buf: &[u8], next: &mut dyn Write) -> Result<()> {
        let Some(operand) = self.operand else {
            next.write_all(buf)?;
            return Ok(());
        };
        let op = self.op;
        self.scratch.clear();
        self.scratch
            .extend(buf.iter().map(|&byte| op.apply(byte, operand)));
        next.write_all(&self.scratch)?;
        Ok(())
    }

    fn close(&mut self, _next: &mut dyn Write) -> Result<Outcome> {
        self.scratch = Vec::new();
        Ok(Outcome::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactKey, Severity, Version};

    fn context() -> ArtifactDescriptor {
        ArtifactDescriptor::new(ArtifactKey::new("ns", "binary", "tool", Version::new(1, 0, 0)))
    }

    fn configured(op: ArithmeticOp, data: &str) -> ArithmeticStage {
        let mut stage = ArithmeticStage::new(op);
        let status = stage.initialize(&StageDescriptor::new(op.processor_id()).with_data(data), &context());
        assert!(status.is_ok(), "unexpected status {status}");
        stage
    }

    #[test]
    fn test_add_wraps() {
        let mut stage = configured(ArithmeticOp::Add, "1");
        let mut out = Vec::new();
        stage.write(&[0, 1, 255], &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 0]);
    }

    #[test]
    fn test_multiply() {
        let mut stage = configured(ArithmeticOp::Multiply, "2");
        let mut out = Vec::new();
        stage.write(&[1, 2, 3, 200], &mut out).unwrap();
        assert_eq!(out, vec![2, 4, 6, 144]);
    }

    #[test]
    fn test_negative_operand_is_modular() {
        let mut stage = configured(ArithmeticOp::Add, "-1");
        assert_eq!(stage.operand(), Some(255));
        let mut out = Vec::new();
        stage.write(&[5], &mut out).unwrap();
        assert_eq!(out, vec![4]);
    }

    #[test]
    fn test_shift() {
        let mut stage = configured(ArithmeticOp::ShiftLeft, "1");
        let mut out = Vec::new();
        stage.write(b"Test", &mut out).unwrap();
        let expected: Vec<u8> = b"Test".iter().map(|b| b << 1).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_invalid_operand_disables_stage() {
        let mut stage = ArithmeticStage::new(ArithmeticOp::ShiftLeft);
        let optional = stage.initialize(
            &StageDescriptor::new("transform.shift").with_data("9"),
            &context(),
        );
        assert_eq!(optional.severity, Severity::Info);
        assert!(!stage.is_enabled());

        let mut stage = ArithmeticStage::new(ArithmeticOp::Add);
        let required = stage.initialize(
            &StageDescriptor::new("transform.add").with_data("abc").required(),
            &context(),
        );
        assert_eq!(required.severity, Severity::Error);
        assert!(!stage.is_enabled());
    }

    #[test]
    fn test_missing_operand() {
        let mut stage = ArithmeticStage::new(ArithmeticOp::Multiply);
        let status = stage.initialize(&StageDescriptor::new("transform.multiply"), &context());
        assert_eq!(status.severity, Severity::Info);
        assert!(status.message.contains("requires an operand"));
    }
}
