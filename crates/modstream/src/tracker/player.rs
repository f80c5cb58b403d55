//! Pattern sequencer: walks the order list, applies effects and drives the mixer.

use crate::tracker::mixer::{self, MixerSettings, Pan, Voice};
use crate::tracker::module::{Module, Note, ROWS_PER_PATTERN};

/// PAL Amiga clock divided by two: period -> Hz.
const PAL_CLOCK: f64 = 3_546_894.6;
const MIN_PERIOD: u16 = 113;
const MAX_PERIOD: u16 = 856;
const DEFAULT_SPEED: u8 = 6;
const DEFAULT_BPM: u8 = 125;
/// Global volume ceiling.
pub const MAX_VOLUME: u8 = 128;

const VIBRATO_SINE: [u8; 32] = [
    0, 24, 49, 74, 97, 120, 141, 161, 180, 197, 212, 224, 235, 244, 250, 253, 255, 253, 250, 244,
    235, 224, 212, 197, 180, 161, 141, 120, 97, 74, 49, 24,
];

#[derive(Clone, Debug)]
struct Channel {
    voice: Voice,
    note: Note,
    sample: Option<usize>,
    period: u16,
    /// Period actually played this tick (after arpeggio/vibrato).
    out_period: u16,
    finetune: i8,
    volume: u8,
    porta_target: u16,
    porta_speed: u8,
    vib_pos: u8,
    vib_speed: u8,
    vib_depth: u8,
    offset_mem: u8,
}

impl Channel {
    fn new(index: usize) -> Self {
        Self {
            voice: Voice::new(Pan::for_channel(index)),
            note: Note::default(),
            sample: None,
            period: 0,
            out_period: 0,
            finetune: 0,
            volume: 0,
            porta_target: 0,
            porta_speed: 0,
            vib_pos: 0,
            vib_speed: 0,
            vib_depth: 0,
            offset_mem: 0,
        }
    }

    fn volume_slide(&mut self, param: u8) {
        let up = param >> 4;
        let down = param & 0x0F;
        self.volume = if up != 0 {
            (self.volume + up).min(64)
        } else {
            self.volume.saturating_sub(down)
        };
    }

    fn tone_portamento(&mut self) {
        if self.porta_target == 0 || self.period == 0 {
            return;
        }
        let speed = u16::from(self.porta_speed);
        if self.period < self.porta_target {
            self.period = (self.period + speed).min(self.porta_target);
        } else if self.period > self.porta_target {
            self.period = self.period.saturating_sub(speed).max(self.porta_target);
        }
        self.out_period = self.period;
    }

    fn vibrato(&mut self) {
        let delta = u16::from(VIBRATO_SINE[(self.vib_pos & 31) as usize])
            * u16::from(self.vib_depth)
            / 128;
        self.out_period = if self.vib_pos & 32 == 0 {
            self.period.saturating_add(delta)
        } else {
            self.period.saturating_sub(delta)
        };
        self.vib_pos = (self.vib_pos + self.vib_speed) & 63;
    }

    fn frequency(&self) -> f64 {
        if self.out_period == 0 {
            return 0.0;
        }
        PAL_CLOCK / f64::from(self.out_period) * 2f64.powf(f64::from(self.finetune) / 96.0)
    }
}

/// Plays one [`Module`] into interleaved `i16`.
#[derive(Clone, Debug)]
pub struct Player {
    module: Module,
    settings: MixerSettings,
    /// Restart from the module's restart order instead of finishing.
    pub wrap: bool,
    playing: bool,
    paused: bool,
    finished: bool,
    volume: u8,
    speed: u8,
    bpm: u8,
    tick: usize,
    row: usize,
    order: usize,
    pattern_delay: u8,
    jump_order: Option<usize>,
    break_row: Option<usize>,
    tick_left: usize,
    channels: Vec<Channel>,
    acc: Vec<i32>,
}

impl Player {
    pub fn new(module: Module, settings: MixerSettings) -> Self {
        let channels = (0..module.channels).map(Channel::new).collect();
        Self {
            module,
            settings,
            wrap: false,
            playing: false,
            paused: false,
            finished: false,
            volume: MAX_VOLUME,
            speed: DEFAULT_SPEED,
            bpm: DEFAULT_BPM,
            tick: 0,
            row: 0,
            order: 0,
            pattern_delay: 0,
            jump_order: None,
            break_row: None,
            tick_left: 0,
            channels,
            acc: Vec::new(),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn start(&mut self) {
        if self.finished {
            self.rewind();
        }
        self.playing = true;
    }

    /// Halt and rewind to the first order.
    pub fn stop(&mut self) {
        self.playing = false;
        self.rewind();
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_playing(&self) -> bool {
        self.playing && !self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Current `(order, row)`.
    pub fn position(&self) -> (usize, usize) {
        (self.order, self.row)
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(MAX_VOLUME);
    }

    pub fn set_rate(&mut self, rate: u32) {
        self.settings.rate = rate;
        self.update_voices();
    }

    pub fn set_stereo(&mut self, stereo: bool) {
        self.settings.stereo = stereo;
    }

    fn rewind(&mut self) {
        self.finished = false;
        self.order = 0;
        self.row = 0;
        self.tick = 0;
        self.tick_left = 0;
        self.speed = DEFAULT_SPEED;
        self.bpm = DEFAULT_BPM;
        self.pattern_delay = 0;
        self.jump_order = None;
        self.break_row = None;
        self.channels = (0..self.module.channels).map(Channel::new).collect();
    }

    fn samples_per_tick(&self) -> usize {
        (self.settings.rate as usize * 5 / (2 * usize::from(self.bpm.max(1)))).max(1)
    }

    /// Mix exactly `out.len()` interleaved samples. Silence when not playing.
    pub fn render(&mut self, out: &mut [i16]) {
        out.fill(0);
        for c in &mut self.channels {
            c.voice.peak = 0;
        }
        if !self.playing || self.paused || self.finished {
            return;
        }
        let chans = self.settings.channels();
        let frames = out.len() / chans;
        self.acc.clear();
        self.acc.resize(frames * chans, 0);

        let mut done = 0;
        while done < frames {
            if self.tick_left == 0 {
                if self.finished {
                    break;
                }
                self.run_tick();
                self.tick_left = self.samples_per_tick();
            }
            let n = self.tick_left.min(frames - done);
            let gain = i32::from(self.volume);
            let Self {
                module,
                channels,
                acc,
                ..
            } = self;
            let span = &mut acc[done * chans..(done + n) * chans];
            for c in channels.iter_mut() {
                let Some(sample) = c.sample.and_then(|i| module.samples.get(i)) else {
                    continue;
                };
                let loop_range = sample
                    .has_loop()
                    .then_some((sample.loop_start, sample.loop_end()));
                c.voice
                    .mix(module.sample_data(sample), loop_range, gain, span, chans);
            }
            self.tick_left -= n;
            done += n;
        }
        mixer::clip_into(&self.acc, self.module.channels, out);
    }

    fn run_tick(&mut self) {
        if self.tick == 0 {
            self.play_row();
        } else {
            self.tick_effects();
        }
        self.update_voices();
        self.advance();
    }

    fn advance(&mut self) {
        self.tick += 1;
        let row_ticks = usize::from(self.speed.max(1)) * (1 + usize::from(self.pattern_delay));
        if self.tick < row_ticks {
            return;
        }
        self.tick = 0;
        self.pattern_delay = 0;

        let (order, row) = if self.jump_order.is_some() || self.break_row.is_some() {
            (
                self.jump_order.take().unwrap_or(self.order + 1),
                self.break_row.take().unwrap_or(0),
            )
        } else if self.row + 1 >= ROWS_PER_PATTERN {
            (self.order + 1, 0)
        } else {
            (self.order, self.row + 1)
        };

        if order >= self.module.orders.len() {
            if !self.wrap {
                tracing::debug!("tracker reached end of order list");
                self.finished = true;
                return;
            }
            self.order = self.module.restart;
            if self.order == 0 {
                self.speed = DEFAULT_SPEED;
                self.bpm = DEFAULT_BPM;
            }
        } else {
            self.order = order;
        }
        self.row = row;
    }

    fn play_row(&mut self) {
        let Some(pattern) = self.module.pattern_at(self.order) else {
            self.finished = true;
            return;
        };
        for (index, c) in self.channels.iter_mut().enumerate() {
            let note = pattern.note(self.row, index);
            c.note = note;

            if note.sample != 0 {
                let idx = usize::from(note.sample) - 1;
                if let Some(s) = self.module.samples.get(idx) {
                    c.sample = Some(idx);
                    c.volume = s.volume;
                    c.finetune = s.finetune;
                }
            }

            let porta = matches!(note.effect, 0x3 | 0x5);
            if note.period != 0 {
                if porta {
                    c.porta_target = note.period;
                } else {
                    c.period = note.period;
                    c.vib_pos = 0;
                    let mut offset = 0;
                    if note.effect == 0x9 {
                        if note.param != 0 {
                            c.offset_mem = note.param;
                        }
                        offset = usize::from(c.offset_mem) * 256;
                    }
                    let len = c
                        .sample
                        .and_then(|i| self.module.samples.get(i))
                        .map_or(0, |s| s.len());
                    if offset < len {
                        c.voice.trigger(offset);
                    } else {
                        c.voice.active = false;
                    }
                }
            }
            c.out_period = c.period;

            let (x, y) = (note.param >> 4, note.param & 0x0F);
            match note.effect {
                0x3 if note.param != 0 => c.porta_speed = note.param,
                0x4 => {
                    if x != 0 {
                        c.vib_speed = x;
                    }
                    if y != 0 {
                        c.vib_depth = y;
                    }
                }
                0xB => self.jump_order = Some(usize::from(note.param)),
                0xC => c.volume = note.param.min(64),
                0xD => self.break_row = Some(usize::from(x * 10 + y).min(ROWS_PER_PATTERN - 1)),
                0xE => match x {
                    0x1 => c.period = c.period.saturating_sub(u16::from(y)).max(MIN_PERIOD),
                    0x2 => c.period = (c.period + u16::from(y)).min(MAX_PERIOD),
                    0xA => c.volume = (c.volume + y).min(64),
                    0xB => c.volume = c.volume.saturating_sub(y),
                    0xC if y == 0 => c.volume = 0,
                    0xE if self.pattern_delay == 0 => self.pattern_delay = y,
                    _ => {}
                },
                0xF if note.param != 0 => {
                    if note.param < 32 {
                        self.speed = note.param;
                    } else {
                        self.bpm = note.param;
                    }
                }
                _ => {}
            }
            if matches!(note.effect, 0xE) && matches!(x, 0x1 | 0x2) {
                c.out_period = c.period;
            }
        }
    }

    fn tick_effects(&mut self) {
        let tick = self.tick % usize::from(self.speed.max(1));
        for c in &mut self.channels {
            let note = c.note;
            let (x, y) = (note.param >> 4, note.param & 0x0F);
            c.out_period = c.period;
            match note.effect {
                0x0 if note.param != 0 => {
                    let semis = [0, x, y][tick % 3];
                    let factor = 2f64.powf(-f64::from(semis) / 12.0);
                    c.out_period = (f64::from(c.period) * factor).round() as u16;
                }
                0x1 => {
                    c.period = c.period.saturating_sub(u16::from(note.param)).max(MIN_PERIOD);
                    c.out_period = c.period;
                }
                0x2 => {
                    c.period = (c.period + u16::from(note.param)).min(MAX_PERIOD);
                    c.out_period = c.period;
                }
                0x3 => c.tone_portamento(),
                0x4 => c.vibrato(),
                0x5 => {
                    c.tone_portamento();
                    c.volume_slide(note.param);
                }
                0x6 => {
                    c.vibrato();
                    c.volume_slide(note.param);
                }
                0xA => c.volume_slide(note.param),
                0xE => match x {
                    0x9 if y != 0 && tick % usize::from(y) == 0 => c.voice.trigger(0),
                    0xC if tick == usize::from(y) => c.volume = 0,
                    _ => {}
                },
                _ => {}
            }
        }
    }

    fn update_voices(&mut self) {
        let rate = f64::from(self.settings.rate.max(1));
        for c in &mut self.channels {
            c.voice.step = c.frequency() / rate;
            c.voice.volume = c.volume;
        }
    }

    /// Playback frequency of `voice` in Hz, 0 when silent.
    pub fn voice_frequency(&self, voice: usize) -> u32 {
        self.channels
            .get(voice)
            .filter(|c| c.voice.active)
            .map_or(0, |c| c.frequency().round() as u32)
    }

    /// Channel volume of `voice` on a 0..=256 scale.
    pub fn voice_volume(&self, voice: usize) -> u32 {
        self.channels
            .get(voice)
            .filter(|c| c.voice.active)
            .map_or(0, |c| u32::from(c.volume) * 4)
    }

    /// Peak level of `voice` over the last render, 0..=65535.
    pub fn real_voice_volume(&self, voice: usize) -> u32 {
        self.channels.get(voice).map_or(0, |c| c.voice.peak)
    }
}
