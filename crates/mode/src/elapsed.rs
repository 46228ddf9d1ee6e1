use std::{
    fmt::{self, Display},
    time::Duration,
};

/// Wall-clock time spent on a step, printed as `mm:ss.mmm`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, Hash)]
pub struct Elapsed {
    duration: Duration,
}

impl Elapsed {
    pub const ZERO: Self = Self::new(Duration::ZERO);

    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Elapsed {
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    pub const fn millis(&self) -> u32 {
        self.duration.subsec_millis()
    }

    pub const fn seconds(&self) -> u64 {
        self.duration.as_secs() % 60
    }

    pub const fn minutes(&self) -> u64 {
        self.duration.as_secs() / 60
    }
}

impl From<Duration> for Elapsed {
    fn from(duration: Duration) -> Self {
        Self::new(duration)
    }
}

impl Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.millis();
        let seconds = self.seconds();
        let minutes = self.minutes();

        write!(f, "{minutes:02}:{seconds:02}.{millis:03}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_minutes_seconds_millis() {
        let elapsed = Elapsed::new(Duration::from_millis(20 * 60_000 + 7_000 + 42));

        assert_eq!(elapsed.to_string(), "20:07.042");
        assert_eq!(Elapsed::ZERO.to_string(), "00:00.000");
    }

    #[test]
    fn minutes_do_not_wrap() {
        let elapsed = Elapsed::new(Duration::from_secs(125 * 60));

        assert_eq!(elapsed.minutes(), 125);
        assert_eq!(elapsed.seconds(), 0);
    }
}
