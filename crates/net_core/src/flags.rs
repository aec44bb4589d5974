//! Update flags: what changed about an entity or avatar since it was last sent.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlags: u32 {
        const POSITION = 1 << 0;
        const ROTATION = 1 << 1;
        const VELOCITY = 1 << 2;
        const ACCELERATION = 1 << 3;
        const ANGULAR_VELOCITY = 1 << 4;
        const SHAPE = 1 << 5;
        /// Object flag bits (phantom, physical, temporary...).
        const FLAGS = 1 << 6;
        const TEXT = 1 << 7;
        const TEXTURES = 1 << 8;
        const PARTICLES = 1 << 9;
        const SOUND = 1 << 10;
        const MEDIA = 1 << 11;
        const PROPERTIES = 1 << 12;

        /// Motion-only fields carried by a terse update.
        const TERSE = Self::POSITION.bits()
            | Self::ROTATION.bits()
            | Self::VELOCITY.bits()
            | Self::ACCELERATION.bits()
            | Self::ANGULAR_VELOCITY.bits();

        /// Every observable field.
        const FULL_UPDATE = Self::TERSE.bits()
            | Self::SHAPE.bits()
            | Self::FLAGS.bits()
            | Self::TEXT.bits()
            | Self::TEXTURES.bits()
            | Self::PARTICLES.bits()
            | Self::SOUND.bits()
            | Self::MEDIA.bits()
            | Self::PROPERTIES.bits();

        /// Marker: the viewer must receive a full snapshot, never a terse one.
        const FORCED = 1 << 31;
        const FORCED_FULL = Self::FULL_UPDATE.bits() | Self::FORCED.bits();
    }
}

impl UpdateFlags {
    /// Combine two pending change sets. Bitwise OR, except that a forced
    /// update subsumes everything else.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let m = self | other;
        if m.contains(Self::FORCED) { Self::FORCED_FULL } else { m }
    }

    #[must_use]
    pub fn is_forced(self) -> bool {
        self.contains(Self::FORCED)
    }

    /// True when every set bit is a motion field.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn is_terse(self) -> bool {
        !self.is_empty() && Self::TERSE.contains(self)
    }

    /// True when only the object flag bits changed; such updates do not
    /// affect appearance.
    #[must_use]
    pub fn is_flags_only(self) -> bool {
        self == Self::FLAGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_union_and_order_independent() {
        let a = UpdateFlags::POSITION | UpdateFlags::ROTATION;
        let b = UpdateFlags::TEXT;
        assert_eq!(a.merge(b), a | b);
        assert_eq!(b.merge(a), a | b);
        assert_eq!(a.merge(a), a);
    }

    #[test]
    fn forced_dominates_lesser_flags() {
        let forced = UpdateFlags::FORCED;
        assert_eq!(UpdateFlags::POSITION.merge(forced), UpdateFlags::FORCED_FULL);
        assert_eq!(UpdateFlags::FORCED_FULL.merge(UpdateFlags::TEXT), UpdateFlags::FORCED_FULL);
        assert!(UpdateFlags::FORCED_FULL.contains(UpdateFlags::FULL_UPDATE));
    }

    #[test]
    fn classification_helpers() {
        assert!(UpdateFlags::POSITION.is_terse());
        assert!(UpdateFlags::TERSE.is_terse());
        assert!(!(UpdateFlags::POSITION | UpdateFlags::SHAPE).is_terse());
        assert!(!UpdateFlags::empty().is_terse());
        assert!(UpdateFlags::FLAGS.is_flags_only());
        assert!(!(UpdateFlags::FLAGS | UpdateFlags::TEXT).is_flags_only());
    }
}
