// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Logic values and per-interval transition classes.
//!
//! The edge classifier maps a `(previous, next)` pair of logic values to one
//! of four transition classes. An unknown previous value collapses to a
//! Rise or Fall: simulators start every net at `x`, and the first real
//! value is treated as the net's initial transition.

use crate::error::TraceError;

/// Value of a single net at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicValue {
    Low,
    High,
    Unknown,
}

impl LogicValue {
    /// Decode a VCD scalar value character. `z`, `x` and anything
    /// unrecognized become [`LogicValue::Unknown`].
    #[inline]
    pub fn from_vcd_byte(b: u8) -> Self {
        match b {
            b'0' => LogicValue::Low,
            b'1' => LogicValue::High,
            _ => LogicValue::Unknown,
        }
    }

    #[inline]
    pub fn is_known(self) -> bool {
        self != LogicValue::Unknown
    }
}

impl std::fmt::Display for LogicValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicValue::Low => write!(f, "0"),
            LogicValue::High => write!(f, "1"),
            LogicValue::Unknown => write!(f, "x"),
        }
    }
}

/// What a net did over one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransitionClass {
    Rise,
    Fall,
    High,
    Low,
}

impl TransitionClass {
    /// All classes, in the canonical enumeration order of the scenario
    /// universe (and of the exported scenario tables).
    pub const ALL: [TransitionClass; 4] = [
        TransitionClass::Rise,
        TransitionClass::Fall,
        TransitionClass::High,
        TransitionClass::Low,
    ];

    /// Position of this class within [`TransitionClass::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        match self {
            TransitionClass::Rise => 0,
            TransitionClass::Fall => 1,
            TransitionClass::High => 2,
            TransitionClass::Low => 3,
        }
    }

    #[inline]
    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    /// Single-letter code used in tables: `R`, `F`, `H`, `L`.
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionClass::Rise => "R",
            TransitionClass::Fall => "F",
            TransitionClass::High => "H",
            TransitionClass::Low => "L",
        }
    }

    /// Logic value at the start of the interval.
    pub fn initial_value(self) -> LogicValue {
        match self {
            TransitionClass::High | TransitionClass::Fall => LogicValue::High,
            TransitionClass::Low | TransitionClass::Rise => LogicValue::Low,
        }
    }

    /// Logic value at the end of the interval.
    pub fn final_value(self) -> LogicValue {
        match self {
            TransitionClass::High | TransitionClass::Rise => LogicValue::High,
            TransitionClass::Low | TransitionClass::Fall => LogicValue::Low,
        }
    }

    /// Whether the net actually switched.
    #[inline]
    pub fn is_switching(self) -> bool {
        matches!(self, TransitionClass::Rise | TransitionClass::Fall)
    }
}

impl std::fmt::Display for TransitionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransitionClass {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "R" | "r" | "rise" => Ok(TransitionClass::Rise),
            "F" | "f" | "fall" => Ok(TransitionClass::Fall),
            "H" | "h" | "high" => Ok(TransitionClass::High),
            "L" | "l" | "low" => Ok(TransitionClass::Low),
            _ => Err(format!(
                "Unknown transition class '{}', expected R/F/H/L",
                s
            )),
        }
    }
}

/// Classify the interval between two successive values of a net.
///
/// `x -> 1` and `x -> 0` are initialization transitions and map to Rise and
/// Fall. Any pairing with an unknown next value, or `x -> x`, is rejected.
pub fn classify(prev: LogicValue, next: LogicValue) -> Result<TransitionClass, TraceError> {
    use LogicValue::*;
    match (prev, next) {
        (Low, High) => Ok(TransitionClass::Rise),
        (Low, Low) => Ok(TransitionClass::Low),
        (High, Low) => Ok(TransitionClass::Fall),
        (High, High) => Ok(TransitionClass::High),
        (Unknown, High) => Ok(TransitionClass::Rise),
        (Unknown, Low) => Ok(TransitionClass::Fall),
        (p, n) => Err(TraceError::MalformedTrace(format!(
            "unrecognized value transition {} -> {}",
            p, n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_pairs() {
        use LogicValue::*;
        assert_eq!(classify(Low, High), Ok(TransitionClass::Rise));
        assert_eq!(classify(Low, Low), Ok(TransitionClass::Low));
        assert_eq!(classify(High, Low), Ok(TransitionClass::Fall));
        assert_eq!(classify(High, High), Ok(TransitionClass::High));
        assert_eq!(classify(Unknown, High), Ok(TransitionClass::Rise));
        assert_eq!(classify(Unknown, Low), Ok(TransitionClass::Fall));
    }

    #[test]
    fn test_classify_rejects_unknown_next() {
        use LogicValue::*;
        for prev in [Low, High, Unknown] {
            let err = classify(prev, Unknown).unwrap_err();
            assert!(matches!(err, TraceError::MalformedTrace(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_classify_is_history_free() {
        // Repeated classification never depends on earlier calls.
        for _ in 0..3 {
            assert_eq!(
                classify(LogicValue::High, LogicValue::High),
                Ok(TransitionClass::High)
            );
            assert_eq!(
                classify(LogicValue::Low, LogicValue::High),
                Ok(TransitionClass::Rise)
            );
        }
    }

    #[test]
    fn test_transition_class_roundtrip_and_endpoints() {
        for (i, tc) in TransitionClass::ALL.iter().enumerate() {
            assert_eq!(tc.index(), i);
            assert_eq!(TransitionClass::from_index(i), Some(*tc));
            assert_eq!(tc.as_str().parse::<TransitionClass>(), Ok(*tc));
            // The classifier agrees with the class endpoints.
            assert_eq!(classify(tc.initial_value(), tc.final_value()), Ok(*tc));
        }
        assert!("Q".parse::<TransitionClass>().is_err());
        assert_eq!(TransitionClass::from_index(4), None);
    }

    #[test]
    fn test_vcd_byte_decoding() {
        assert_eq!(LogicValue::from_vcd_byte(b'0'), LogicValue::Low);
        assert_eq!(LogicValue::from_vcd_byte(b'1'), LogicValue::High);
        assert_eq!(LogicValue::from_vcd_byte(b'x'), LogicValue::Unknown);
        assert_eq!(LogicValue::from_vcd_byte(b'z'), LogicValue::Unknown);
        assert!(!LogicValue::Unknown.is_known());
    }
}
