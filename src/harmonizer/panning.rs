// -------------------------------------------------------------------------------------------------

/// Hands out MIDI pan positions (0 - 127, 64 = center) to harmonizer voices.
///
/// The stereo field is split into one slot per voice, spread evenly over the current stereo
/// width. Slots are handed out from the center outwards, so a few voices sound narrow and
/// the image widens as more voices join in.
#[derive(Debug, Clone)]
pub struct PanningManager {
    stereo_width: f32,
    num_voices: usize,
    // pan values in center-outward order
    pan_vals: Vec<u8>,
    available: Vec<bool>,
}

impl PanningManager {
    pub const CENTER: u8 = 64;

    pub fn new(num_voices: usize, stereo_width: f32) -> Self {
        let mut manager = Self {
            stereo_width: stereo_width.clamp(0.0, 100.0),
            num_voices: 0,
            pan_vals: Vec::new(),
            available: Vec::new(),
        };
        manager.set_number_of_voices(num_voices);
        manager
    }

    pub fn stereo_width(&self) -> f32 {
        self.stereo_width
    }

    pub fn num_voices(&self) -> usize {
        self.num_voices
    }

    /// Number of pan slots which can still be handed out.
    pub fn num_available(&self) -> usize {
        self.available.iter().filter(|a| **a).count()
    }

    /// Resize the pan slots for a new number of voices. All slots become available.
    pub fn set_number_of_voices(&mut self, num_voices: usize) {
        let num_voices = num_voices.max(1);
        self.num_voices = num_voices;
        self.pan_vals = Vec::with_capacity(num_voices);
        self.available = Vec::with_capacity(num_voices);
        self.rebuild();
    }

    /// Spread the pan slots over a new stereo width in percent. All slots become available:
    /// playing voices must request new positions via [`Self::closest_new_pan_val_from_old`].
    pub fn update_stereo_width(&mut self, stereo_width: f32) {
        self.stereo_width = stereo_width.clamp(0.0, 100.0);
        self.rebuild();
    }

    /// Take the next free pan value, or the center when all slots are in use.
    pub fn get_next_pan_val(&mut self) -> u8 {
        match self.available.iter().position(|a| *a) {
            Some(index) => {
                self.available[index] = false;
                self.pan_vals[index]
            }
            None => Self::CENTER,
        }
    }

    /// Take the free pan value which is closest to the given old one.
    pub fn closest_new_pan_val_from_old(&mut self, old_pan: u8) -> u8 {
        let closest = self
            .pan_vals
            .iter()
            .zip(&self.available)
            .enumerate()
            .filter(|(_, (_, available))| **available)
            .min_by_key(|(_, (pan, _))| (**pan as i32 - old_pan as i32).abs())
            .map(|(index, _)| index);
        match closest {
            Some(index) => {
                self.available[index] = false;
                self.pan_vals[index]
            }
            None => Self::CENTER,
        }
    }

    /// Give back a pan value which was taken before.
    pub fn pan_val_turned_off(&mut self, pan: u8) {
        if let Some(index) = self
            .pan_vals
            .iter()
            .zip(&self.available)
            .position(|(value, available)| *value == pan && !*available)
        {
            self.available[index] = true;
        }
    }

    /// Make all slots available again.
    pub fn reset(&mut self) {
        self.available.fill(true);
    }

    fn rebuild(&mut self) {
        let num_voices = self.num_voices;
        self.pan_vals.clear();
        if num_voices == 1 {
            self.pan_vals.push(Self::CENTER);
        } else {
            let range = 63.5 * self.stereo_width / 100.0;
            for index in 0..num_voices {
                let position = 2.0 * index as f32 / (num_voices - 1) as f32 - 1.0;
                let pan = (64.0 + range * position).round().clamp(0.0, 127.0) as u8;
                self.pan_vals.push(pan);
            }
        }
        self.pan_vals
            .sort_unstable_by_key(|pan| ((*pan as i32 - Self::CENTER as i32).abs(), *pan));
        self.available.clear();
        self.available.resize(num_voices, true);
    }
}

impl Default for PanningManager {
    fn default() -> Self {
        Self::new(1, 100.0)
    }
}

// -------------------------------------------------------------------------------------------------
