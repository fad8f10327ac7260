//! Audio focus channel states.
//!
//! The focus manager that arbitrates the audio channels lives outside this
//! crate. It hands the scheduler a [`FocusState`] and a [`MixingBehavior`]
//! through [`crate::alerts::AlertScheduler::update_focus`].

/// Focus granted to the alerts channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusState {
    /// The alert owns the audio output.
    Foreground,
    /// Another activity owns the output; the alert plays quietly or pauses.
    Background,
    /// The alert lost the channel and must stop.
    None,
}

/// How the alert audio should blend with other audio while in focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixingBehavior {
    /// No behavior was provided.
    Undefined,
    /// The alert is the primary audio.
    Primary,
    /// The alert may keep playing at a lower volume.
    MayDuck,
    /// The alert must pause until it regains the foreground.
    MustPause,
}
