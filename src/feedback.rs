//! Turns the magnetic noise level into a colour on the LED ring and a beep
//! cadence on the buzzer, variometer style: the noisier it gets, the higher
//! and faster the beeps.
//!
//! Nothing in here sleeps. The beeper is a two phase toggle that compares
//! the tick it is handed against the last toggle, so it has to be stepped
//! every pass through the main loop.

// Copyright (c) 2024 The H-RTK bridge firmware authors
//
// This file is part of the H-RTK bridge firmware.
//
// The H-RTK bridge firmware is free software: you can redistribute it and/or modify it under
// the terms only of version 3 of the GNU General Public License as published
// by the Free Software Foundation
//
// The H-RTK bridge firmware is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// the H-RTK bridge firmware(in a file named COPYING).
// If not, see <https://www.gnu.org/licenses/>.

use fugit::MillisDurationU32;
use smart_leds::RGB8;

use crate::{elapsed, Instant};

/// Upper edges of the colour bands, in µT
pub const SAFE_UT: f32 = 5.0;
pub const CAUTION_UT: f32 = 6.0;
pub const WARNING_UT: f32 = 8.0;
pub const DANGER_UT: f32 = 10.0;

const GREEN: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
const YELLOW_GREEN: RGB8 = RGB8 { r: 128, g: 255, b: 0 };
const ORANGE: RGB8 = RGB8 { r: 255, g: 128, b: 0 };
const RED: RGB8 = RGB8 { r: 255, g: 0, b: 0 };
const OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// How long the tone sounds each beep
pub const BEEP_ON_MS: u32 = 50;
/// Shortest silence between beeps
pub const MIN_BEEP_GAP_MS: u32 = 10;

/// (upper edge in µT, frequency in Hz, beep period in ms), upper edges
/// inclusive. Anything above the last edge uses `BEEP_ABOVE_TABLE`.
const BEEP_TABLE: [(f32, u32, u32); 6] = [
    (5.0, 0, 0),
    (6.0, 400, 700),
    (7.0, 550, 500),
    (8.0, 700, 350),
    (9.0, 850, 200),
    (10.0, 1000, 100),
];
const BEEP_ABOVE_TABLE: (u32, u32) = (1200, 50);

/// A ring of addressable LEDs that all show the same colour
pub trait LedRing {
    fn fill(&mut self, color: RGB8);
}

/// Something that can play a square wave
pub trait Tone {
    fn start(&mut self, freq_hz: u32);
    fn stop(&mut self);
}

/// Beep frequency and period for a noise level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeepParams {
    /// 0 means silence
    pub frequency_hz: u32,
    pub interval_ms: u32,
}

fn lerp(from: u8, to: u8, ratio: f32) -> u8 {
    (from as f32 + (to as f32 - from as f32) * ratio) as u8
}

fn blend(from: RGB8, to: RGB8, ratio: f32) -> RGB8 {
    RGB8 {
        r: lerp(from.r, to.r, ratio),
        g: lerp(from.g, to.g, ratio),
        b: lerp(from.b, to.b, ratio),
    }
}

/// Green through yellow-green and orange to red, linear inside each band
pub fn color_for(noise_ut: f32) -> RGB8 {
    if noise_ut <= SAFE_UT {
        GREEN
    } else if noise_ut <= CAUTION_UT {
        blend(GREEN, YELLOW_GREEN, (noise_ut - SAFE_UT) / (CAUTION_UT - SAFE_UT))
    } else if noise_ut <= WARNING_UT {
        blend(YELLOW_GREEN, ORANGE, (noise_ut - CAUTION_UT) / (WARNING_UT - CAUTION_UT))
    } else if noise_ut <= DANGER_UT {
        blend(ORANGE, RED, (noise_ut - WARNING_UT) / (DANGER_UT - WARNING_UT))
    } else {
        RED
    }
}

pub fn beep_params_for(noise_ut: f32) -> BeepParams {
    let (frequency_hz, interval_ms) = BEEP_TABLE
        .iter()
        .find(|(edge, _, _)| noise_ut <= *edge)
        .map(|(_, freq, interval)| (*freq, *interval))
        .unwrap_or(BEEP_ABOVE_TABLE);

    BeepParams {
        frequency_hz,
        interval_ms,
    }
}

/// Scale each channel by `pct` percent, rounding down
pub fn dim(color: RGB8, pct: u8) -> RGB8 {
    let scale = |c: u8| (c as u16 * pct as u16 / 100) as u8;
    RGB8 {
        r: scale(color.r),
        g: scale(color.g),
        b: scale(color.b),
    }
}

/// Owns the LED ring and the buzzer
pub struct NoiseFeedback<L, T> {
    leds: L,
    tone: T,
    brightness_pct: u8,
    led_enabled: bool,
    buzzer_enabled: bool,

    color: RGB8,
    beep: BeepParams,
    beep_on: bool,
    last_toggle: Instant,
}

impl<L: LedRing, T: Tone> NoiseFeedback<L, T> {
    pub fn new(leds: L, tone: T, brightness_pct: u8) -> Self {
        Self {
            leds,
            tone,
            brightness_pct: brightness_pct.min(100),
            led_enabled: true,
            buzzer_enabled: true,
            color: GREEN,
            beep: BeepParams::default(),
            beep_on: false,
            last_toggle: Instant::from_ticks(0),
        }
    }

    /// Take in a new noise level. Repaints the ring, the buzzer picks up the
    /// new cadence on its next step.
    pub fn update(&mut self, noise_ut: f32) {
        self.color = color_for(noise_ut);
        self.beep = beep_params_for(noise_ut);

        if self.led_enabled {
            self.leds.fill(dim(self.color, self.brightness_pct));
        }
    }

    /// Advance the beeper. At most one on/off transition per call.
    pub fn step_beep(&mut self, now: Instant) {
        if !self.buzzer_enabled || self.beep.frequency_hz == 0 {
            self.tone.stop();
            self.beep_on = false;
            return;
        }

        let since_toggle = elapsed(now, self.last_toggle);

        if self.beep_on {
            if since_toggle >= MillisDurationU32::millis(BEEP_ON_MS) {
                self.tone.stop();
                self.beep_on = false;
                self.last_toggle = now;
            }
        } else {
            let gap = self
                .beep
                .interval_ms
                .saturating_sub(BEEP_ON_MS)
                .max(MIN_BEEP_GAP_MS);
            if since_toggle >= MillisDurationU32::millis(gap) {
                self.tone.start(self.beep.frequency_hz);
                self.beep_on = true;
                self.last_toggle = now;
            }
        }
    }

    /// Gate each channel. Turning one off blanks or silences it right away.
    pub fn set_enabled(&mut self, led: bool, buzzer: bool) {
        self.led_enabled = led;
        self.buzzer_enabled = buzzer;

        if led {
            self.leds.fill(dim(self.color, self.brightness_pct));
        } else {
            self.leds.fill(OFF);
        }

        if !buzzer {
            self.tone.stop();
            self.beep_on = false;
        }
    }

    /// (led, buzzer)
    pub fn enabled(&self) -> (bool, bool) {
        (self.led_enabled, self.buzzer_enabled)
    }

    /// Undimmed colour for the last noise level
    pub fn color(&self) -> RGB8 {
        self.color
    }

    pub fn beep_params(&self) -> BeepParams {
        self.beep
    }

    pub fn is_beep_on(&self) -> bool {
        self.beep_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeRing {
        frames: Vec<RGB8>,
    }

    impl LedRing for FakeRing {
        fn fill(&mut self, color: RGB8) {
            self.frames.push(color);
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum ToneEvent {
        Start(u32),
        Stop,
    }

    #[derive(Default)]
    struct FakeTone {
        events: Vec<ToneEvent>,
    }

    impl Tone for FakeTone {
        fn start(&mut self, freq_hz: u32) {
            self.events.push(ToneEvent::Start(freq_hz));
        }

        fn stop(&mut self) {
            self.events.push(ToneEvent::Stop);
        }
    }

    fn feedback() -> NoiseFeedback<FakeRing, FakeTone> {
        NoiseFeedback::new(FakeRing::default(), FakeTone::default(), 25)
    }

    fn at(ms: u32) -> Instant {
        Instant::from_ticks(ms)
    }

    #[test]
    fn band_endpoints() {
        assert_eq!(color_for(0.0), GREEN);
        assert_eq!(color_for(5.0), GREEN);
        assert_eq!(color_for(6.0), YELLOW_GREEN);
        assert_eq!(color_for(8.0), ORANGE);
        assert_eq!(color_for(10.0), RED);
        assert_eq!(color_for(12.0), RED);
    }

    #[test]
    fn colour_interpolates_inside_a_band() {
        assert_eq!(color_for(5.5), RGB8 { r: 64, g: 255, b: 0 });
        assert_eq!(color_for(9.0), RGB8 { r: 255, g: 64, b: 0 });
    }

    #[test]
    fn bands_meet_at_their_edges() {
        for edge in [SAFE_UT, CAUTION_UT, WARNING_UT, DANGER_UT] {
            let below = color_for(edge);
            let above = color_for(edge + 1e-4);
            for (a, b) in [(below.r, above.r), (below.g, above.g), (below.b, above.b)] {
                assert!(a.abs_diff(b) <= 1, "jump at {}: {:?} -> {:?}", edge, below, above);
            }
        }
        // The upper band starts exactly where the lower one ends
        assert_eq!(blend(GREEN, YELLOW_GREEN, 1.0), blend(YELLOW_GREEN, ORANGE, 0.0));
        assert_eq!(blend(YELLOW_GREEN, ORANGE, 1.0), blend(ORANGE, RED, 0.0));
    }

    #[test]
    fn beep_table_is_exact() {
        let expected = [
            (0.0, 0, 0),
            (5.0, 0, 0),
            (5.01, 400, 700),
            (6.0, 400, 700),
            (6.5, 550, 500),
            (7.0, 550, 500),
            (8.0, 700, 350),
            (9.0, 850, 200),
            (10.0, 1000, 100),
            (10.01, 1200, 50),
            (50.0, 1200, 50),
        ];
        for (noise, frequency_hz, interval_ms) in expected {
            assert_eq!(
                beep_params_for(noise),
                BeepParams {
                    frequency_hz,
                    interval_ms
                },
                "noise {}",
                noise
            );
        }
    }

    #[test]
    fn beeps_speed_up_with_noise() {
        let bands = [5.5, 6.5, 7.5, 8.5, 9.5, 10.5];
        for pair in bands.windows(2) {
            let lower = beep_params_for(pair[0]);
            let upper = beep_params_for(pair[1]);
            assert!(upper.frequency_hz > lower.frequency_hz);
            assert!(upper.interval_ms < lower.interval_ms);
        }
    }

    #[test]
    fn dimming_rounds_down() {
        assert_eq!(dim(RGB8 { r: 255, g: 128, b: 3 }, 25), RGB8 { r: 63, g: 32, b: 0 });
        assert_eq!(dim(RED, 100), RED);
    }

    #[test]
    fn update_paints_dimmed_colour() {
        let mut fb = feedback();
        fb.update(12.0);

        assert_eq!(fb.color(), RED);
        assert_eq!(fb.leds.frames, [RGB8 { r: 63, g: 0, b: 0 }]);
        assert_eq!(fb.beep_params(), BeepParams { frequency_hz: 1200, interval_ms: 50 });
        // Sound only comes from stepping
        assert!(fb.tone.events.is_empty());
    }

    #[test]
    fn silence_forces_tone_off() {
        let mut fb = feedback();
        fb.update(2.0);
        fb.step_beep(at(1_000));

        assert!(!fb.is_beep_on());
        assert_eq!(fb.tone.events, [ToneEvent::Stop]);
    }

    #[test]
    fn beep_alternates_on_and_off() {
        let mut fb = feedback();
        // 400Hz, 700ms period, so 50ms on and 650ms off
        fb.update(5.5);

        fb.step_beep(at(650));
        assert!(fb.is_beep_on());
        fb.step_beep(at(680));
        assert!(fb.is_beep_on());
        fb.step_beep(at(700));
        assert!(!fb.is_beep_on());
        fb.step_beep(at(1_349));
        assert!(!fb.is_beep_on());
        fb.step_beep(at(1_350));
        assert!(fb.is_beep_on());

        assert_eq!(
            fb.tone.events,
            [ToneEvent::Start(400), ToneEvent::Stop, ToneEvent::Start(400)]
        );
    }

    #[test]
    fn one_transition_per_step_even_after_a_long_gap() {
        let mut fb = feedback();
        fb.update(11.0);

        fb.step_beep(at(100_000));
        assert!(fb.is_beep_on());
        fb.step_beep(at(900_000));
        assert!(!fb.is_beep_on());
        fb.step_beep(at(900_000));
        assert!(!fb.is_beep_on());
        // Gap floors at 10ms for the 50ms period
        fb.step_beep(at(900_010));
        assert!(fb.is_beep_on());
    }

    #[test]
    fn beeper_survives_tick_wraparound() {
        let mut fb = feedback();
        fb.update(11.0);

        fb.step_beep(at(u32::MAX - 20));
        assert!(fb.is_beep_on());
        // 50ms later, across the wrap
        fb.step_beep(at(29));
        assert!(!fb.is_beep_on());
    }

    #[test]
    fn disabling_blanks_and_silences() {
        let mut fb = feedback();
        fb.update(11.0);
        fb.step_beep(at(1_000));
        assert!(fb.is_beep_on());

        fb.set_enabled(false, false);
        assert_eq!(fb.enabled(), (false, false));
        assert!(!fb.is_beep_on());
        assert_eq!(fb.leds.frames.last(), Some(&OFF));
        assert_eq!(fb.tone.events.last(), Some(&ToneEvent::Stop));

        // Still tracks the noise level, just doesn't show it
        fb.update(2.0);
        assert_eq!(fb.color(), GREEN);
        assert_eq!(fb.leds.frames.last(), Some(&OFF));
        fb.update(11.0);
        fb.step_beep(at(5_000));
        assert!(!fb.is_beep_on());
    }

    proptest! {
        #[test]
        fn colour_never_gains_green_as_noise_rises(a in 0.0f32..15.0, b in 0.0f32..15.0) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(color_for(low).g >= color_for(high).g);
            prop_assert!(color_for(low).r <= color_for(high).r);
            prop_assert_eq!(color_for(high).b, 0);
        }
    }
}
