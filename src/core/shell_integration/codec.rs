//! Wire formats for shell-integration sequences
//!
//! A codec looks at a complete OSC body (the bytes between `ESC ]` and the
//! terminator) and either claims it as a [`ShellIntegrationEvent`] or passes.

use std::path::PathBuf;

use super::ShellIntegrationEvent;

/// Translates OSC bodies into shell-integration events
pub trait ShellIntegrationCodec: Send {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Decode one OSC body. `None` means the body is not ours or is malformed.
    fn decode(&self, body: &str) -> Option<ShellIntegrationEvent>;
}

/// The default codec set: 633, 133 and cwd reporting
pub fn default_codecs() -> Vec<Box<dyn ShellIntegrationCodec>> {
    vec![
        Box::new(Osc633Codec),
        Box::new(Osc133Codec),
        Box::new(CwdReportCodec),
    ]
}

/// `OSC 633 ; <kind> [; args]`: command tracking with command lines, cwd and marks
#[derive(Debug, Default, Clone, Copy)]
pub struct Osc633Codec;

impl ShellIntegrationCodec for Osc633Codec {
    fn name(&self) -> &'static str {
        "633"
    }

    fn decode(&self, body: &str) -> Option<ShellIntegrationEvent> {
        let rest = body.strip_prefix("633;")?;
        let (kind, args) = match rest.split_once(';') {
            Some((kind, args)) => (kind, Some(args)),
            None => (rest, None),
        };

        match kind {
            "A" => Some(ShellIntegrationEvent::PromptStart),
            "B" => Some(ShellIntegrationEvent::CommandStart),
            "C" => Some(ShellIntegrationEvent::CommandExecuted),
            "D" => Some(ShellIntegrationEvent::CommandFinished {
                exit_code: parse_exit_code(args),
            }),
            "E" => {
                // E ; <command line> [; <nonce>]
                let args = args.unwrap_or("");
                let line = args.split(';').next().unwrap_or("");
                Some(ShellIntegrationEvent::CommandLine(unescape_633(line)))
            }
            "P" => {
                let (key, value) = args?.split_once('=')?;
                let value = unescape_633(value);
                if key == "Cwd" {
                    if value.is_empty() {
                        return None;
                    }
                    Some(ShellIntegrationEvent::CwdChanged(PathBuf::from(value)))
                } else {
                    Some(ShellIntegrationEvent::Property {
                        key: key.to_string(),
                        value,
                    })
                }
            }
            "SetMark" => {
                let mut id = None;
                let mut hidden = false;
                for param in args.unwrap_or("").split(';').filter(|p| !p.is_empty()) {
                    match param.split_once('=') {
                        Some(("Id", value)) => id = Some(unescape_633(value)),
                        Some(("Hidden", value)) => hidden = value != "false",
                        None if param == "Hidden" => hidden = true,
                        _ => {}
                    }
                }
                Some(ShellIntegrationEvent::SetMark { id, hidden })
            }
            // Continuation and right prompts carry nothing we track
            _ => None,
        }
    }
}

/// `OSC 133 ; <kind> [; args]`: FinalTerm prompt marks
#[derive(Debug, Default, Clone, Copy)]
pub struct Osc133Codec;

impl ShellIntegrationCodec for Osc133Codec {
    fn name(&self) -> &'static str {
        "133"
    }

    fn decode(&self, body: &str) -> Option<ShellIntegrationEvent> {
        let rest = body.strip_prefix("133;")?;
        let (kind, args) = match rest.split_once(';') {
            Some((kind, args)) => (kind, Some(args)),
            None => (rest, None),
        };
        match kind {
            "A" => Some(ShellIntegrationEvent::PromptStart),
            "B" => Some(ShellIntegrationEvent::CommandStart),
            "C" => Some(ShellIntegrationEvent::CommandExecuted),
            "D" => Some(ShellIntegrationEvent::CommandFinished {
                exit_code: parse_exit_code(args),
            }),
            _ => None,
        }
    }
}

/// Working-directory reports: `OSC 7 ; file://host/path` and
/// `OSC 1337 ; CurrentDir=path`
#[derive(Debug, Default, Clone, Copy)]
pub struct CwdReportCodec;

impl ShellIntegrationCodec for CwdReportCodec {
    fn name(&self) -> &'static str {
        "cwd"
    }

    fn decode(&self, body: &str) -> Option<ShellIntegrationEvent> {
        if let Some(uri) = body.strip_prefix("7;") {
            let rest = uri.strip_prefix("file://")?;
            // Skip the host component
            let path = &rest[rest.find('/')?..];
            let path = percent_decode(path)?;
            return Some(ShellIntegrationEvent::CwdChanged(PathBuf::from(path)));
        }
        if let Some(path) = body.strip_prefix("1337;CurrentDir=") {
            if path.is_empty() {
                return None;
            }
            return Some(ShellIntegrationEvent::CwdChanged(PathBuf::from(path)));
        }
        None
    }
}

/// First argument as an exit code; anything non-numeric is unknown.
fn parse_exit_code(args: Option<&str>) -> Option<i32> {
    args?.split(';').next()?.trim().parse().ok()
}

/// Undo 633 escaping: `\\` is a backslash, `\xAB` a hex byte.
fn unescape_633(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes.get(i + 1) == Some(&b'\\') {
                out.push(b'\\');
                i += 2;
                continue;
            }
            if bytes.get(i + 1) == Some(&b'x') && i + 3 < bytes.len() {
                if let Some(byte) = hex_byte(bytes[i + 2], bytes[i + 3]) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = *bytes.get(i + 1)?;
            let lo = *bytes.get(i + 2)?;
            out.push(hex_byte(hi, lo)?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_byte(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
