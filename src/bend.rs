use crate::types::StringChannel;

/// Converts pitch-wheel values into a visual string displacement.
///
/// String 1 is drawn bending one way, all others the opposite way, the
/// direction a fretting hand pushes each string.
#[derive(Debug, Clone, Copy)]
pub struct BendMapper {
    max_visual_bend: f32,
    max_pitch_shift: u16,
}

impl BendMapper {
    pub fn new(max_visual_bend: f32, max_pitch_shift: u16) -> Self {
        Self {
            max_visual_bend,
            max_pitch_shift: max_pitch_shift.max(1),
        }
    }

    pub fn pixels_per_unit(&self) -> f32 {
        self.max_visual_bend / self.max_pitch_shift as f32
    }

    /// Pitch value limited to `0..=max_pitch_shift`.
    pub fn clamp(&self, pitch: i32) -> u16 {
        pitch.clamp(0, self.max_pitch_shift as i32) as u16
    }

    pub fn direction(string: StringChannel) -> f32 {
        if string.number() == 1 {
            1.0
        } else {
            -1.0
        }
    }

    /// Signed displacement for `pitch` on `string`.
    pub fn offset(&self, pitch: i32, string: StringChannel) -> f32 {
        self.clamp(pitch) as f32 * self.pixels_per_unit() * Self::direction(string)
    }
}
