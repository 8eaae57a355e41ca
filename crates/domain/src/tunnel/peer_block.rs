//! Text surgery on the tunnel daemon's configuration file.
//!
//! The file is a `[Interface]` header followed by peer blocks of the form
//!
//! ```text
//! # Peer: laptop
//! [Peer]
//! PublicKey = <key>
//! AllowedIPs = 10.0.0.2/32
//!
//! ```
//!
//! Everything here works on in-memory text; reading, locking and atomic
//! replacement of the file belong to the adapter.

use std::net::Ipv4Addr;

const MARKER_PREFIX: &str = "# Peer:";
const PEER_SECTION: &str = "[Peer]";

/// Minimal `[Interface]` section written when the file does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceHeader {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub listen_port: u16,
}

impl InterfaceHeader {
    pub fn render(&self) -> String {
        format!(
            "[Interface]\nAddress = {}/{}\nListenPort = {}\n\n",
            self.address, self.prefix_len, self.listen_port
        )
    }
}

/// One peer's block, ready to be appended.
#[derive(Debug, Clone, Copy)]
pub struct PeerBlock<'a> {
    pub name: &'a str,
    pub public_key: &'a str,
    pub address: Ipv4Addr,
}

impl PeerBlock<'_> {
    pub fn render(&self) -> String {
        format!(
            "{MARKER_PREFIX} {}\n{PEER_SECTION}\nPublicKey = {}\nAllowedIPs = {}/32\n\n",
            self.name, self.public_key, self.address
        )
    }
}

/// Content after appending `block`. `existing` is `None` when the file is
/// absent, in which case `header` is synthesized first.
pub fn append_peer_block(
    existing: Option<&str>,
    header: &InterfaceHeader,
    block: &PeerBlock<'_>,
) -> String {
    let mut out = match existing {
        Some(content) => content.to_string(),
        None => header.render(),
    };
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&block.render());
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind<'a> {
    Marker,
    Section,
    Key(&'a str),
    AllowedIps,
    Blank,
    Other,
}

fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with(MARKER_PREFIX) {
        return LineKind::Marker;
    }
    if trimmed.starts_with('[') {
        return LineKind::Section;
    }
    match trimmed.split_once('=') {
        Some((k, v)) if k.trim() == "PublicKey" => LineKind::Key(v.trim()),
        Some((k, _)) if k.trim() == "AllowedIPs" => LineKind::AllowedIps,
        _ => LineKind::Other,
    }
}

enum State<'a> {
    Outside,
    /// Marker (and section) lines seen; the key line decides their fate.
    Candidate(Vec<&'a str>),
    /// Inside the target block, before its allow-list line.
    Matching,
    /// Allow-list line consumed; one trailing blank separator may follow.
    Trailing,
}

/// Content with the block whose `PublicKey` equals `public_key` removed.
///
/// A single sequential pass. Lines outside the target block, including the
/// header and other peers' blocks, are copied byte for byte. Removing a key
/// that is not present returns the input unchanged.
pub fn remove_peer_block(content: &str, public_key: &str) -> String {
    let target = public_key.trim();
    let mut out = String::with_capacity(content.len());
    let mut state = State::Outside;

    for line in content.split_inclusive('\n') {
        let kind = classify(line);
        let mut reprocess = true;
        while reprocess {
            reprocess = false;
            state = match state {
                State::Outside => match kind {
                    LineKind::Marker => State::Candidate(vec![line]),
                    _ => {
                        out.push_str(line);
                        State::Outside
                    }
                },
                State::Candidate(mut pending) => match kind {
                    LineKind::Section => {
                        pending.push(line);
                        State::Candidate(pending)
                    }
                    LineKind::Key(value) if value == target => State::Matching,
                    LineKind::Marker => {
                        pending.drain(..).for_each(|l| out.push_str(l));
                        State::Candidate(vec![line])
                    }
                    _ => {
                        pending.drain(..).for_each(|l| out.push_str(l));
                        out.push_str(line);
                        State::Outside
                    }
                },
                State::Matching => match kind {
                    LineKind::AllowedIps => State::Trailing,
                    LineKind::Blank => State::Outside,
                    LineKind::Marker | LineKind::Section => {
                        reprocess = true;
                        State::Outside
                    }
                    LineKind::Key(_) | LineKind::Other => State::Matching,
                },
                State::Trailing => match kind {
                    LineKind::Blank => State::Outside,
                    _ => {
                        reprocess = true;
                        State::Outside
                    }
                },
            };
        }
    }

    if let State::Candidate(pending) = state {
        pending.into_iter().for_each(|l| out.push_str(l));
    }
    out
}

/// Public keys of every `[Peer]` section, in file order.
pub fn peer_keys(content: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut in_peer = false;
    for line in content.lines() {
        match classify(line) {
            LineKind::Section => in_peer = line.trim() == PEER_SECTION,
            LineKind::Key(value) if in_peer => keys.push(value.to_string()),
            _ => {}
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "aGVsbG8gd29ybGQgdGhpcyBpcyBwZWVyIEEgMDAwMDA=";
    const KEY_B: &str = "Yi1rZXktZm9yLXBlZXItQi0tLS0tLS0tLS0tLS0tLS0=";

    fn header() -> InterfaceHeader {
        InterfaceHeader {
            address: Ipv4Addr::new(10, 0, 0, 1),
            prefix_len: 24,
            listen_port: 51820,
        }
    }

    fn block_a() -> PeerBlock<'static> {
        PeerBlock {
            name: "laptop",
            public_key: KEY_A,
            address: Ipv4Addr::new(10, 0, 0, 2),
        }
    }

    fn block_b() -> PeerBlock<'static> {
        PeerBlock {
            name: "phone",
            public_key: KEY_B,
            address: Ipv4Addr::new(10, 0, 0, 3),
        }
    }

    #[test]
    fn append_to_missing_file_writes_header() {
        let content = append_peer_block(None, &header(), &block_a());
        assert_eq!(
            content,
            format!(
                "[Interface]\nAddress = 10.0.0.1/24\nListenPort = 51820\n\n\
                 # Peer: laptop\n[Peer]\nPublicKey = {KEY_A}\nAllowedIPs = 10.0.0.2/32\n\n"
            )
        );
    }

    #[test]
    fn append_to_existing_file_keeps_content() {
        let existing = "[Interface]\nPrivateKey = server\nListenPort = 51820\n";
        let content = append_peer_block(Some(existing), &header(), &block_a());
        assert!(content.starts_with(existing));
        assert!(!content.contains("Address = 10.0.0.1/24"));
    }

    #[test]
    fn append_adds_missing_newline() {
        let content = append_peer_block(Some("[Interface]"), &header(), &block_a());
        assert!(content.starts_with("[Interface]\n# Peer: laptop\n"));
    }

    #[test]
    fn append_then_remove_is_byte_identical() {
        let before = "[Interface]\nAddress = 10.0.0.1/24\nListenPort = 51820\nPrivateKey = s\n\n";
        let appended = append_peer_block(Some(before), &header(), &block_a());
        assert_ne!(appended, before);
        assert_eq!(remove_peer_block(&appended, KEY_A), before);
    }

    #[test]
    fn remove_first_of_two_leaves_second_intact() {
        let one = append_peer_block(None, &header(), &block_a());
        let two = append_peer_block(Some(&one), &header(), &block_b());

        let after = remove_peer_block(&two, KEY_A);
        assert_eq!(after, format!("{}{}", header().render(), block_b().render()));
        assert_eq!(peer_keys(&after), vec![KEY_B.to_string()]);
    }

    #[test]
    fn remove_second_of_two_leaves_first_intact() {
        let one = append_peer_block(None, &header(), &block_a());
        let two = append_peer_block(Some(&one), &header(), &block_b());
        assert_eq!(remove_peer_block(&two, KEY_B), one);
    }

    #[test]
    fn remove_unknown_key_is_noop() {
        let content = append_peer_block(None, &header(), &block_a());
        assert_eq!(remove_peer_block(&content, KEY_B), content);
    }

    #[test]
    fn remove_is_idempotent() {
        let content = append_peer_block(None, &header(), &block_a());
        let once = remove_peer_block(&content, KEY_A);
        assert_eq!(remove_peer_block(&once, KEY_A), once);
    }

    #[test]
    fn key_prefix_does_not_match() {
        let content = append_peer_block(None, &header(), &block_a());
        assert_eq!(remove_peer_block(&content, &KEY_A[..10]), content);
    }

    #[test]
    fn hand_added_lines_inside_block_are_dropped() {
        let content = format!(
            "{}# Peer: laptop\n[Peer]\nPublicKey = {KEY_A}\nPresharedKey = x\nAllowedIPs = 10.0.0.2/32\n\n{}",
            header().render(),
            block_b().render()
        );
        assert_eq!(
            remove_peer_block(&content, KEY_A),
            format!("{}{}", header().render(), block_b().render())
        );
    }

    #[test]
    fn block_without_blank_separator_stops_at_next_marker() {
        let content = format!(
            "# Peer: laptop\n[Peer]\nPublicKey = {KEY_A}\nAllowedIPs = 10.0.0.2/32\n{}",
            block_b().render()
        );
        assert_eq!(remove_peer_block(&content, KEY_A), block_b().render());
    }

    #[test]
    fn dangling_marker_at_end_is_preserved() {
        let content = "[Interface]\n# Peer: orphan\n";
        assert_eq!(remove_peer_block(content, KEY_A), content);
    }

    #[test]
    fn crlf_lines_are_preserved_verbatim() {
        let content = format!(
            "[Interface]\r\n\r\n# Peer: laptop\r\n[Peer]\r\nPublicKey = {KEY_A}\r\nAllowedIPs = 10.0.0.2/32\r\n\r\n"
        );
        assert_eq!(remove_peer_block(&content, KEY_A), "[Interface]\r\n\r\n");
    }

    #[test]
    fn peer_keys_ignores_interface_section() {
        let content = format!(
            "[Interface]\nPublicKey = not-a-peer\n\n{}{}",
            block_a().render(),
            block_b().render()
        );
        assert_eq!(peer_keys(&content), vec![KEY_A.to_string(), KEY_B.to_string()]);
    }
}
