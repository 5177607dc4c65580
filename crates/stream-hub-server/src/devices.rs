//! ALSA device discovery and mixer helpers.
//!
//! Everything here shells out to the standard ALSA utilities (`aplay`,
//! `arecord`, `amixer`) with short timeouts, matching what an operator
//! would run by hand on the device.

use std::process::Stdio;

use tokio::process::Command;

use crate::models::DeviceInfo;

const LIST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);
const MIXER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Capture device used when nothing better can be detected.
pub(crate) const CAPTURE_FALLBACK: &str = "hw:1,0";

/// Mixer simple controls tried in order when forcing output volume up.
const VOLUME_CONTROLS: [&str; 6] = [
    "Master",
    "PCM",
    "Speaker",
    "Speaker Playback Volume",
    "Headphone",
    "Playback",
];

/// Cards advertised by `aplay -l`, USB cards first in preference.
pub(crate) async fn list_playback() -> Vec<DeviceInfo> {
    parse_card_list(&run_list_tool("aplay").await, "plughw")
}

/// Cards advertised by `arecord -l`.
pub(crate) async fn list_capture() -> Vec<DeviceInfo> {
    parse_card_list(&run_list_tool("arecord").await, "hw")
}

/// Output device the launcher uses when none is configured:
/// first USB playback card, else the first card, else ALSA's default.
pub(crate) async fn default_playback_device() -> String {
    match preferred_card(&list_playback().await) {
        Some(card) => card.alsa_id.clone(),
        None => "default".to_string(),
    }
}

/// Capture device for the level meter fallback path.
pub(crate) async fn default_capture_device() -> String {
    match preferred_card(&list_capture().await) {
        Some(card) => card.alsa_id.clone(),
        None => CAPTURE_FALLBACK.to_string(),
    }
}

/// First USB card, else the first card.
pub(crate) fn preferred_card(cards: &[DeviceInfo]) -> Option<&DeviceInfo> {
    cards.iter().find(|c| c.usb).or_else(|| cards.first())
}

async fn run_list_tool(tool: &str) -> String {
    let mut cmd = Command::new(tool);
    cmd.arg("-l");
    cmd.stdin(Stdio::null());
    cmd.stderr(Stdio::null());
    cmd.stdout(Stdio::piped());
    let output = tokio::time::timeout(LIST_TIMEOUT, cmd.output()).await;
    match output {
        Ok(Ok(out)) => String::from_utf8_lossy(&out.stdout).into_owned(),
        Ok(Err(err)) => {
            tracing::debug!(tool, error = %err, "device listing tool unavailable");
            String::new()
        }
        Err(_) => {
            tracing::warn!(tool, "device listing timed out");
            String::new()
        }
    }
}

/// Parse `aplay -l` / `arecord -l` output. Lines look like:
/// `card 1: Device [USB Audio Device], device 0: USB Audio [USB Audio]`.
pub(crate) fn parse_card_list(text: &str, id_prefix: &str) -> Vec<DeviceInfo> {
    let mut cards: Vec<DeviceInfo> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.to_lowercase().starts_with("card ") {
            continue;
        }
        let rest = &trimmed[5..];
        let Some((index_part, tail)) = rest.split_once(':') else {
            continue;
        };
        let Ok(card) = index_part.trim().parse::<u32>() else {
            continue;
        };
        if cards.iter().any(|c| c.card == card) {
            continue;
        }
        let name = tail
            .split_once('[')
            .and_then(|(_, after)| after.split_once(']'))
            .map(|(inner, _)| inner.trim().to_string())
            .unwrap_or_else(|| tail.split(',').next().unwrap_or(tail).trim().to_string());
        cards.push(DeviceInfo {
            card,
            usb: trimmed.to_lowercase().contains("usb"),
            alsa_id: format!("{id_prefix}:{card},0"),
            name,
        });
    }
    cards
}

/// Card index embedded in a device string like `plughw:2,0`, if any.
pub(crate) fn card_of_device(device: &str) -> Option<&str> {
    let rest = device
        .strip_prefix("plughw:")
        .or_else(|| device.strip_prefix("hw:"))?;
    let card = rest.split(',').next()?;
    if card.is_empty() { None } else { Some(card) }
}

/// Force the output mixer to full volume and unmute it. Software volume
/// is applied downstream, so the hardware mixer should never attenuate.
pub(crate) async fn set_mixer_full(device: &str) {
    let card = card_of_device(device).map(str::to_string);
    for control in VOLUME_CONTROLS {
        if run_amixer(card.as_deref(), control, "100%").await {
            let _ = run_amixer(card.as_deref(), control, "unmute").await;
            tracing::debug!(control, device, "mixer set to full volume");
            return;
        }
    }
    tracing::debug!(device, "no writable mixer control found");
}

async fn run_amixer(card: Option<&str>, control: &str, value: &str) -> bool {
    let mut cmd = Command::new("amixer");
    if let Some(card) = card {
        cmd.arg("-c").arg(card);
    }
    cmd.arg("sset").arg(control).arg(value);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    match tokio::time::timeout(MIXER_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APLAY_SAMPLE: &str = "\
**** List of PLAYBACK Hardware Devices ****
card 0: Headphones [bcm2835 Headphones], device 0: bcm2835 Headphones [bcm2835 Headphones]
  Subdevices: 8/8
  Subdevice #0: subdevice #0
card 1: Device [USB Audio Device], device 0: USB Audio [USB Audio]
  Subdevices: 1/1
  Subdevice #0: subdevice #0
";

    #[test]
    fn parses_cards_with_descriptions() {
        let cards = parse_card_list(APLAY_SAMPLE, "plughw");
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].card, 0);
        assert_eq!(cards[0].name, "bcm2835 Headphones");
        assert!(!cards[0].usb);
        assert_eq!(cards[1].card, 1);
        assert_eq!(cards[1].name, "USB Audio Device");
        assert!(cards[1].usb);
        assert_eq!(cards[1].alsa_id, "plughw:1,0");
    }

    #[test]
    fn usb_card_is_preferred() {
        let cards = parse_card_list(APLAY_SAMPLE, "plughw");
        let preferred = preferred_card(&cards).unwrap();
        assert_eq!(preferred.card, 1);
    }

    #[test]
    fn first_card_wins_without_usb() {
        let text = "card 0: Headphones [bcm2835 Headphones], device 0: x [x]\n";
        let cards = parse_card_list(text, "plughw");
        assert_eq!(preferred_card(&cards).unwrap().card, 0);
    }

    #[test]
    fn duplicate_card_lines_collapse() {
        let text = "\
card 2: Device [USB Audio], device 0: a [a]
card 2: Device [USB Audio], device 1: b [b]
";
        let cards = parse_card_list(text, "hw");
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].alsa_id, "hw:2,0");
    }

    #[test]
    fn empty_listing_yields_no_cards() {
        assert!(parse_card_list("", "plughw").is_empty());
        assert!(parse_card_list("no soundcards found...", "plughw").is_empty());
    }

    #[test]
    fn card_index_extraction() {
        assert_eq!(card_of_device("plughw:2,0"), Some("2"));
        assert_eq!(card_of_device("hw:0,0"), Some("0"));
        assert_eq!(card_of_device("default"), None);
        assert_eq!(card_of_device("hw:"), None);
    }
}
