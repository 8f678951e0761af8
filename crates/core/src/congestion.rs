//! Congestion signal derived from client receiver reports.
//!
//! Each check samples the client's RR count for one session. Nothing new
//! since the previous check means no signal; otherwise the latest report's
//! loss fraction and jitter are classified:
//!
//! | condition                            | signal |
//! |--------------------------------------|--------|
//! | fraction lost >= 0.03                | -2     |
//! | jitter > 10                          | -1     |
//! | fraction lost < 0.02 and jitter < 10 | +1     |
//! | otherwise                            | 0      |
//!
//! The signal is consumed by whatever picks encodings or rates; this module
//! only reports it through [`RateSelector`].

use crate::rtcp::Peer;
use crate::session::RtpSession;

const SEVERE_LOSS: f64 = 0.03;
const LOW_LOSS: f64 = 0.02;
const JITTER_LIMIT: f64 = 10.0;

/// Direction a rate-selection collaborator should move in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Heavy loss: step down two levels.
    SevereLoss,
    /// High jitter: step down one level.
    HighJitter,
    /// No new report or nothing conclusive.
    Hold,
    /// Clean link: step up one level.
    Improve,
}

impl Signal {
    /// Numeric form: -2, -1, 0 or +1.
    pub fn value(&self) -> i32 {
        match self {
            Self::SevereLoss => -2,
            Self::HighJitter => -1,
            Self::Hold => 0,
            Self::Improve => 1,
        }
    }
}

/// Classify one receiver report.
pub fn classify(fraction_lost: f64, jitter: f64) -> Signal {
    if fraction_lost >= SEVERE_LOSS {
        Signal::SevereLoss
    } else if jitter > JITTER_LIMIT {
        Signal::HighJitter
    } else if fraction_lost < LOW_LOSS && jitter < JITTER_LIMIT {
        Signal::Improve
    } else {
        Signal::Hold
    }
}

/// Compare the session's RR count with the cached one and classify the
/// latest report if it is new.
pub fn change_check(session: &mut RtpSession) -> Signal {
    let client = &session.stats()[Peer::Client];
    let count = client.rr_received;
    if count == session.previous_count() {
        return Signal::Hold;
    }
    let signal = classify(client.fraction_lost(), client.jitter as f64);
    session.set_previous_count(count);
    tracing::trace!(
        session_id = session.id(),
        rr = count,
        signal = signal.value(),
        "congestion check"
    );
    signal
}

/// Collaborator that adapts encoding or rate to a congestion signal.
pub trait RateSelector: Send + Sync {
    fn stream_change(&self, session: &RtpSession, signal: Signal);
}

/// Default selector: records the signal in the log and changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnly;

impl RateSelector for LogOnly {
    fn stream_change(&self, session: &RtpSession, signal: Signal) {
        if signal != Signal::Hold {
            tracing::debug!(
                session_id = session.id(),
                signal = signal.value(),
                "stream change requested"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        assert_eq!(classify(0.03, 0.0), Signal::SevereLoss);
        assert_eq!(classify(0.0299, 0.0), Signal::Hold);
        assert_eq!(classify(0.5, 50.0), Signal::SevereLoss);
        assert_eq!(classify(0.029, 10.1), Signal::HighJitter);
        assert_eq!(classify(0.019, 9.9), Signal::Improve);
        assert_eq!(classify(0.025, 9.9), Signal::Hold);
        assert_eq!(classify(0.0, 10.0), Signal::Hold);
    }

    #[test]
    fn numeric_values() {
        let values: Vec<_> = [
            Signal::SevereLoss,
            Signal::HighJitter,
            Signal::Hold,
            Signal::Improve,
        ]
        .iter()
        .map(Signal::value)
        .collect();
        assert_eq!(values, [-2, -1, 0, 1]);
    }
}
