#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ModifierKey {
    Alt,
    Ctrl,
    Meta,
    Shift,
}

impl ModifierKey {
    pub const ALL: [ModifierKey; 4] = [Self::Alt, Self::Ctrl, Self::Meta, Self::Shift];

    pub fn label(self) -> &'static str {
        match self {
            Self::Alt => "alt",
            Self::Ctrl => "ctrl",
            Self::Meta => "meta",
            Self::Shift => "shift",
        }
    }
}

/// Modifier keys currently held down, as last reported by the terminal.
///
/// Each key is last-write-wins; there is no ordering between keys.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PressedKeys {
    alt: bool,
    ctrl: bool,
    meta: bool,
    shift: bool,
}

impl PressedKeys {
    pub fn set(&mut self, key: ModifierKey, held: bool) {
        match key {
            ModifierKey::Alt => self.alt = held,
            ModifierKey::Ctrl => self.ctrl = held,
            ModifierKey::Meta => self.meta = held,
            ModifierKey::Shift => self.shift = held,
        }
    }

    pub fn is_held(&self, key: ModifierKey) -> bool {
        match key {
            ModifierKey::Alt => self.alt,
            ModifierKey::Ctrl => self.ctrl,
            ModifierKey::Meta => self.meta,
            ModifierKey::Shift => self.shift,
        }
    }

    pub fn held(&self) -> impl Iterator<Item = ModifierKey> + '_ {
        ModifierKey::ALL
            .into_iter()
            .filter(|key| self.is_held(*key))
    }
}
