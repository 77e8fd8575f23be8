use super::{Moment, SlidersDef};
use crate::events::{Message, control};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliderKind {
    PitchWheel,
    Pan,
    ModulationWheel,
    Expression,
}

impl SliderKind {
    fn message(self, channel: u8, value: u8) -> Message {
        match self {
            SliderKind::PitchWheel => Message::pitch_wheel(channel, value),
            SliderKind::Pan => Message::control_change(channel, control::PAN, value),
            SliderKind::ModulationWheel => {
                Message::control_change(channel, control::MODULATION_WHEEL, value)
            }
            SliderKind::Expression => Message::control_change(channel, control::EXPRESSION, value),
        }
    }
}

/// Evenly spaced sample positions covering `ms_duration`.
///
/// There are `ms_duration / period_ms` samples (at least one). The spacing is
/// accumulated as a float and floored, so positions don't drift.
pub fn sample_positions(ms_duration: u32, period_ms: u32) -> Vec<u32> {
    let count = (ms_duration / period_ms.max(1)).max(1) as usize;
    let spacing = f64::from(ms_duration) / count as f64;

    let mut positions = Vec::with_capacity(count);
    let mut float_position: f64 = 0.0;
    for _ in 0..count {
        positions.push(float_position.floor() as u32);
        float_position += spacing;
    }
    positions
}

/// Stretches or squeezes a contour to exactly `count` values.
pub fn fit_contour(points: &[u8], count: usize) -> Vec<u8> {
    let len = points.len();
    if count == 0 || len == 0 {
        return Vec::new();
    }
    if len == 1 {
        return vec![points[0]; count];
    }
    if len == count {
        return points.to_vec();
    }
    if len < count {
        return stretched_contour(points, count);
    }

    // len > count: keep the ends, pick evenly from the middle
    if count == 1 {
        return vec![points[0]];
    }
    let step = len / count;
    let mut values = Vec::with_capacity(count);
    values.push(points[0]);
    for i in 1..count - 1 {
        values.push(points[i * step]);
    }
    values.push(points[len - 1]);
    values
}

/// Linear interpolation between the given points, which land at
/// `floor(i * count / (len - 1))` in the result. The first and last points are
/// pinned to the first and last result indices.
fn stretched_contour(points: &[u8], count: usize) -> Vec<u8> {
    let len = points.len();
    let mut peaks = Vec::with_capacity(len);
    peaks.push(0);
    if len > 2 {
        let stretch = count as f64 / (len - 1) as f64;
        for i in 1..len - 1 {
            peaks.push((i as f64 * stretch).floor() as usize);
        }
    }
    peaks.push(count - 1);

    let mut values = Vec::with_capacity(count);
    for i in 1..len {
        let (from, to) = (peaks[i - 1], peaks[i]);
        if to <= from {
            continue;
        }
        let first = f64::from(points[i - 1]);
        let increment = (f64::from(points[i]) - first) / (to - from) as f64;
        for step in 0..to - from {
            let value = first + (increment * step as f64).floor();
            values.push(value.clamp(0.0, 127.0) as u8);
        }
    }
    values.push(points[len - 1]);
    values
}

/// Builds the slider moments for a chord whose basic chords last
/// `ms_duration`. A value is only sent when it differs from the previous
/// sample of the same slider, and moments left without messages are dropped.
pub fn slider_moments(
    channel: u8,
    sliders: &SlidersDef,
    ms_duration: u32,
    period_ms: u32,
) -> Vec<Moment> {
    let mut moments: Vec<Moment> = sample_positions(ms_duration, period_ms)
        .into_iter()
        .map(Moment::new)
        .collect();

    let contours = [
        (SliderKind::PitchWheel, sliders.pitch_wheel.as_deref()),
        (SliderKind::Pan, sliders.pan.as_deref()),
        (SliderKind::ModulationWheel, sliders.modulation_wheel.as_deref()),
        (SliderKind::Expression, sliders.expression_slider.as_deref()),
    ];

    for (kind, contour) in contours {
        let Some(points) = contour else { continue };
        let values = fit_contour(points, moments.len());
        let mut previous = None;
        for (moment, value) in moments.iter_mut().zip(values) {
            if previous != Some(value) {
                previous = Some(value);
                moment.push(kind.message(channel, value));
            }
        }
    }

    moments.retain(|m| !m.is_empty());
    moments
}
