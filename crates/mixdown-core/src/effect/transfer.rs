//! Compander transfer function
//!
//! Maps an input level to a gain. The curve is given as dB break points
//! (`[soft-knee-dB:]in1[,out1],in2,out2,...`) and stored in natural-log
//! space as alternating straight lines and quadratic knees. A tail segment
//! is added below the first point and a `0,0` point closes the curve.

use std::f64::consts::LN_10;

use super::params::{parse_f64_exact, parse_f64_prefix};

/// One break point with the quadratic that continues from it
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Segment {
    x: f64,
    y: f64,
    a: f64,
    b: f64,
}

/// Parsed and prepared transfer curve
#[derive(Debug, Clone)]
pub struct TransferFunction {
    segments: Vec<Segment>,
    in_min_lin: f64,
    out_min_lin: f64,
    outgain_db: f64,
    curve_db: f64,
}

fn parse_value(text: Option<&str>) -> Result<f64, String> {
    let text = text.ok_or("syntax error trying to read transfer function value")?;
    if text == "-inf" {
        return Ok(-20.0 * 32768f64.log10());
    }
    let value = parse_f64_exact(text).ok_or("syntax error trying to read transfer function value")?;
    if value > 0.0 {
        return Err("transfer function values are relative to maximum volume so can't exceed 0dB".into());
    }
    Ok(value)
}

impl TransferFunction {
    /// Parse a point list and an optional output gain in dB
    pub fn parse(points: &str, gain: Option<&str>) -> Result<Self, String> {
        let mut curve_db = 0.0;
        let mut list = points;
        if let Some((value, rest)) = parse_f64_prefix(points) {
            if let Some(after) = rest.trim_start().strip_prefix(':') {
                curve_db = value;
                list = after;
            }
        }
        let curve_db = curve_db.max(0.01);

        let commas = points.matches(',').count();
        let len = ((1 + commas / 2) + 1) * 2 + 1;
        let mut segments = vec![Segment::default(); len];

        // Points land on even slots, leaving slot 0 for the tail
        let slot = |n: usize| 2 * (n + 1);
        let mut tokens = list.split(',').filter(|t| !t.is_empty());
        let mut num = 0;
        while let Some(text) = tokens.next() {
            if slot(num) >= len {
                return Err("too many transfer function values".into());
            }
            let x = parse_value(Some(text))?;
            segments[slot(num)].x = x;
            if num > 0 && segments[slot(num - 1)].x > x {
                return Err("transfer function input values must be strictly increasing".into());
            }
            if num > 0 || commas & 1 == 1 {
                let y = parse_value(tokens.next())?;
                segments[slot(num)].y = y - x;
            }
            num += 1;
        }
        if num == 0 || segments[slot(num - 1)].x != 0.0 {
            num += 1;
        }

        let outgain_db = match gain {
            Some(text) => parse_f64_exact(text).ok_or("syntax error trying to read post-processing gain value")?,
            None => 0.0,
        };

        // From here on point n lives at slot 2n
        segments[0].x = segments[2].x - 2.0 * curve_db;
        segments[0].y = segments[2].y;
        num += 1;

        // Join adjacent colinear segments
        let mut i = 2;
        while i < num && 2 * i < len {
            let g1 = (segments[2 * (i - 1)].y - segments[2 * (i - 2)].y)
                * (segments[2 * i].x - segments[2 * (i - 1)].x);
            let g2 = (segments[2 * i].y - segments[2 * (i - 1)].y)
                * (segments[2 * (i - 1)].x - segments[2 * (i - 2)].x);
            if (g1 - g2).abs() != 0.0 {
                i += 1;
                continue;
            }
            num -= 1;
            for j in (i - 1)..num {
                if 2 * j + 2 < len {
                    segments[2 * j] = segments[2 * j + 2];
                }
            }
        }

        let mut transfer = Self {
            segments,
            in_min_lin: 0.0,
            out_min_lin: 0.0,
            outgain_db,
            curve_db,
        };
        transfer.prepare();
        Ok(transfer)
    }

    /// Convert to natural logs and round the corners with quadratic knees
    fn prepare(&mut self) {
        let s = &mut self.segments;
        let len = s.len();
        let radius = self.curve_db * LN_10 / 20.0;

        let mut i = 0;
        while i < len && (i == 0 || s[i - 2].x != 0.0) {
            s[i].y += self.outgain_db;
            s[i].x *= LN_10 / 20.0;
            s[i].y *= LN_10 / 20.0;
            i += 2;
        }

        let mut i = 4;
        while i < len && s[i - 2].x != 0.0 {
            let (line1, line3) = (s[i - 4], s[i]);
            let mut line2 = s[i - 2];

            s[i - 4].a = 0.0;
            s[i - 4].b = (line2.y - line1.y) / (line2.x - line1.x);
            line2.a = 0.0;
            line2.b = (line3.y - line2.y) / (line3.x - line2.x);

            let theta = (line2.y - line1.y).atan2(line2.x - line1.x);
            let length = (line2.x - line1.x).hypot(line2.y - line1.y);
            let r = radius.min(length);
            let mut curve = Segment {
                x: line2.x - r * theta.cos(),
                y: line2.y - r * theta.sin(),
                ..Segment::default()
            };

            let theta = (line3.y - line2.y).atan2(line3.x - line2.x);
            let length = (line3.x - line2.x).hypot(line3.y - line2.y);
            let r = radius.min(length / 2.0);
            let x = line2.x + r * theta.cos();
            let y = line2.y + r * theta.sin();

            let cx = (curve.x + line2.x + x) / 3.0;
            let cy = (curve.y + line2.y + y) / 3.0;

            line2.x = x;
            line2.y = y;

            let in1 = cx - curve.x;
            let out1 = cy - curve.y;
            let in2 = line2.x - curve.x;
            let out2 = line2.y - curve.y;
            curve.a = (out2 / in2 - out1 / in1) / (in2 - in1);
            curve.b = out1 / in1 - curve.a * in1;

            s[i - 3] = curve;
            s[i - 2] = line2;
            i += 2;
        }
        if i >= 3 && i - 2 < len {
            s[i - 3].x = 0.0;
            s[i - 3].y = s[i - 2].y;
        }

        self.in_min_lin = s[1].x.exp();
        self.out_min_lin = s[1].y.exp();
    }

    /// Linear gain for a linear input level
    pub fn gain(&self, in_lin: f64) -> f64 {
        if in_lin <= self.in_min_lin {
            return self.out_min_lin;
        }
        let s = &self.segments;
        let mut in_log = in_lin.ln();
        let mut k = 1;
        while k + 1 < s.len() && in_log > s[k + 1].x {
            k += 1;
        }
        in_log -= s[k].x;
        (s[k].y + in_log * (s[k].a * in_log + s[k].b)).exp()
    }

    pub fn output_gain_db(&self) -> f64 {
        self.outgain_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(value: f64) -> f64 {
        10f64.powf(value / 20.0)
    }

    #[test]
    fn test_identity_curve_is_unity() {
        let t = TransferFunction::parse("-90,-90,0,0", None).unwrap();
        for level in [0.001, 0.1, 0.5, 1.0] {
            assert!((t.gain(level) - 1.0).abs() < 1e-9, "level {level}");
        }
    }

    #[test]
    fn test_output_gain_applies() {
        let t = TransferFunction::parse("-90,-90,0,0", Some("-6")).unwrap();
        assert!((t.gain(0.5) - db(-6.0)).abs() < 1e-9);
        assert_eq!(t.output_gain_db(), -6.0);
    }

    #[test]
    fn test_compressor_output_level_is_monotonic() {
        let t = TransferFunction::parse("6:-70,-60,-20", Some("-5")).unwrap();
        let mut last = 0.0;
        for step in 1..=200 {
            let level = step as f64 / 200.0;
            let out = level * t.gain(level);
            assert!(out + 1e-12 >= last, "output fell at {level}");
            last = out;
        }
        // Quiet input is lifted, loud input is not
        assert!(t.gain(db(-50.0)) > 1.0);
        assert!(t.gain(1.0) < 1.0);
    }

    #[test]
    fn test_rejects_bad_points() {
        assert!(TransferFunction::parse("-20,-10,3,0", None).is_err());
        assert!(TransferFunction::parse("-20,-10,-30,-30", None).is_err());
        assert!(TransferFunction::parse("-20,abc", None).is_err());
        assert!(TransferFunction::parse("-70,-60,-20", Some("x")).is_err());
    }

    #[test]
    fn test_minus_inf_accepted() {
        assert!(TransferFunction::parse("-inf,-inf,-20,-10,0,-5", None).is_ok());
    }
}
