/// Render a time-of-day reading (microticks since power-on) as
/// `HH:MM:SS.uuuuuu`, the form shown in device status panes.
pub fn format_tod(tod: u64) -> String {
    let micros = tod % 1_000_000;
    let secs_total = tod / 1_000_000;
    let secs = secs_total % 60;
    let mins = (secs_total / 60) % 60;
    let hours = secs_total / 3600;
    format!("{hours:02}:{mins:02}:{secs:02}.{micros:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero() {
        assert_eq!(format_tod(0), "00:00:00.000000");
    }

    #[test]
    fn formats_mixed_units() {
        // 1 hour, 2 minutes, 3 seconds, 42 microseconds.
        let tod = (3600 + 2 * 60 + 3) * 1_000_000 + 42;
        assert_eq!(format_tod(tod), "01:02:03.000042");
    }

    #[test]
    fn hours_do_not_wrap() {
        let tod = 100 * 3600 * 1_000_000;
        assert_eq!(format_tod(tod), "100:00:00.000000");
    }
}
