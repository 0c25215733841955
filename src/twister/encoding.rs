//! Value and color encoding for the Twister's 7-bit data bytes

/// Map a knob value onto the ring indicator, 0..=127
///
/// `min` maps to 0 and `max` to 127; values outside the range are pinned to
/// the nearest end. An empty or inverted range encodes as 0.
pub fn value_to_wire(value: f64, min: f64, max: f64) -> u8 {
    if !(max > min) || !value.is_finite() {
        return 0;
    }

    let scaled = (127.0 * (value - min) / (max - min)).round();
    scaled.clamp(0.0, 127.0) as u8
}

/// Map a hue in degrees onto the Twister's color wheel, 1..=126
///
/// The device wheel starts at blue and runs the other way round, hence the
/// mirror and the 240 degree offset. 0 and 127 are reserved by the firmware.
pub fn hue_to_wire(hue: f64) -> u8 {
    if !hue.is_finite() {
        return 1;
    }

    let device_hue = (360.0 + (360.0 - hue) - 120.0).rem_euclid(360.0);
    let wire = 1.0 + (125.0 * device_hue / 360.0).round();
    wire.clamp(1.0, 126.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_value_endpoints() {
        assert_eq!(value_to_wire(0.0, 0.0, 10.0), 0);
        assert_eq!(value_to_wire(10.0, 0.0, 10.0), 127);
        assert_eq!(value_to_wire(5.0, 0.0, 10.0), 64); // 63.5 rounds up
        assert_eq!(value_to_wire(-20.0, -20.0, 20.0), 0);
    }

    #[test]
    fn test_value_degenerate_range() {
        assert_eq!(value_to_wire(3.0, 5.0, 5.0), 0);
        assert_eq!(value_to_wire(3.0, 10.0, 0.0), 0);
        assert_eq!(value_to_wire(f64::NAN, 0.0, 1.0), 0);
    }

    #[test]
    fn test_value_outside_range_is_pinned() {
        assert_eq!(value_to_wire(12.0, 0.0, 10.0), 127);
        assert_eq!(value_to_wire(-1.0, 0.0, 10.0), 0);
    }

    #[test]
    fn test_known_hues() {
        // Red sits two thirds of the way round the device wheel
        assert_eq!(hue_to_wire(0.0), 1 + (125.0_f64 * 240.0 / 360.0).round() as u8);
        // Blue is where the device wheel starts
        assert_eq!(hue_to_wire(240.0), 1);
        assert_eq!(hue_to_wire(120.0), 1 + (125.0_f64 * 120.0 / 360.0).round() as u8);
    }

    proptest! {
        #[test]
        fn prop_value_in_wire_range(
            min in -1000.0f64..1000.0,
            span in 0.001f64..1000.0,
            fraction in 0.0f64..=1.0,
        ) {
            let max = min + span;
            let value = min + fraction * span;
            let wire = value_to_wire(value, min, max);
            prop_assert!(wire <= 127);
            prop_assert_eq!(value_to_wire(min, min, max), 0);
            prop_assert_eq!(value_to_wire(max, min, max), 127);
        }

        #[test]
        fn prop_value_monotonic(
            min in -100.0f64..100.0,
            span in 0.1f64..100.0,
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
        ) {
            let max = min + span;
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                value_to_wire(min + lo * span, min, max) <= value_to_wire(min + hi * span, min, max)
            );
        }

        #[test]
        fn prop_hue_in_wire_range(hue in 0.0f64..360.0) {
            let wire = hue_to_wire(hue);
            prop_assert!((1..=126).contains(&wire));
        }

        #[test]
        fn prop_hue_periodic(hue in 0.0f64..360.0, turns in -3i32..3) {
            let shifted = hue + 360.0 * turns as f64;
            prop_assert_eq!(hue_to_wire(hue), hue_to_wire(shifted));
        }
    }
}
