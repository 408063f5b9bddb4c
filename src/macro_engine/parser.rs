//! Text-syntax macro parser.
//!
//! Line-oriented, indentation-scoped, recursive-descent over `LOOP` blocks —
//! ported from the reference macro language: four-space (or one-tab)
//! indentation introduces a block, `#` starts a line comment, and each
//! non-blank line is one of a stick move, a wait, or a button hold.

use crate::controller::{Button, ControllerState, Stick};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MacroStep {
    pub state: ControllerState,
    pub duration: f64,
}

/// Parse a full macro script into its flattened step sequence (`LOOP`
/// blocks are expanded inline).
pub fn parse_text(text: &str) -> Result<Vec<MacroStep>> {
    let lines = preprocess_lines(text);
    let (steps, _) = parse_lines(&lines, 0, 0)?;
    Ok(steps)
}

fn preprocess_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(|line| line.trim_end())
        .filter(|line| !line.is_empty() && !line.trim_start().starts_with('#'))
        .collect()
}

fn indent_level(line: &str) -> usize {
    if line.starts_with('\t') {
        line.len() - line.trim_start_matches('\t').len()
    } else {
        let stripped = line.trim_start();
        (line.len() - stripped.len()) / 4
    }
}

/// Parse lines starting at `start_idx` at the given `indent_level`. Returns
/// the flattened steps and the index of the first unconsumed line (either
/// EOF or a line that dedents back to a shallower level).
fn parse_lines(lines: &[&str], start_idx: usize, indent: usize) -> Result<(Vec<MacroStep>, usize)> {
    let mut steps = Vec::new();
    let mut idx = start_idx;

    while idx < lines.len() {
        let line = lines[idx];
        let current = indent_level(line);

        if current < indent {
            return Ok((steps, idx));
        }
        if current > indent {
            return Err(Error::MacroParse(format!("Unexpected indentation at line: {line}")));
        }

        let stripped = line.trim_start();
        if stripped.starts_with("LOOP") {
            let count = parse_loop_count(stripped)?;
            let (body, next_idx) = parse_lines(lines, idx + 1, indent + 1)?;
            for _ in 0..count {
                steps.extend(body.iter().copied());
            }
            idx = next_idx;
            continue;
        }

        steps.extend(parse_command(stripped)?);
        idx += 1;
    }

    Ok((steps, idx))
}

fn parse_loop_count(line: &str) -> Result<u32> {
    let rest = &line[4..]; // past "LOOP"
    let invalid = || Error::MacroParse(format!("Invalid LOOP syntax: {line}"));
    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return Err(invalid());
    }
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return Err(invalid());
    }
    digits.parse::<u32>().map_err(|_| invalid())
}

fn parse_command(line: &str) -> Result<Vec<MacroStep>> {
    if let Some(steps) = try_parse_stick(line)? {
        return Ok(steps);
    }
    if let Some(duration) = parse_duration_token(line) {
        return Ok(vec![MacroStep {
            state: ControllerState::neutral(),
            duration,
        }]);
    }
    if let Some(steps) = try_parse_buttons(line)? {
        return Ok(steps);
    }
    Err(Error::MacroParse(format!("Invalid macro command: {line}")))
}

fn try_parse_stick(line: &str) -> Result<Option<Vec<MacroStep>>> {
    let (name, rest) = match line.split_once('@') {
        Some(parts) => parts,
        None => return Ok(None),
    };
    let is_left = match name {
        "L_STICK" => true,
        "R_STICK" => false,
        _ => return Ok(None),
    };

    let Some((x, y, tail)) = parse_signed_triplet_pair(rest) else {
        return Ok(None);
    };
    let Some(duration) = parse_duration_token(tail.trim_start()) else {
        return Ok(None);
    };

    let stick = Stick {
        x: x as f32 / 100.0,
        y: y as f32 / 100.0,
    };
    let mut pressed = ControllerState::neutral();
    if is_left {
        pressed.ls = stick;
    } else {
        pressed.rs = stick;
    }

    Ok(Some(vec![
        MacroStep {
            state: pressed,
            duration,
        },
        MacroStep {
            state: ControllerState::neutral(),
            duration: 0.0,
        },
    ]))
}

/// Parse `<sign><3 digits><sign><3 digits>` from the start of `s`, requiring
/// at least one whitespace character immediately after. Returns `(x, y,
/// remainder-after-whitespace)`.
fn parse_signed_triplet_pair(s: &str) -> Option<(i32, i32, &str)> {
    let bytes = s.as_bytes();
    if bytes.len() < 9 {
        return None;
    }
    let (x, rest) = parse_signed_triplet(s)?;
    let (y, rest) = parse_signed_triplet(rest)?;
    let mut chars = rest.char_indices();
    let (_, first) = chars.next()?;
    if !first.is_whitespace() {
        return None;
    }
    Some((x, y, rest))
}

fn parse_signed_triplet(s: &str) -> Option<(i32, &str)> {
    let bytes = s.as_bytes();
    if bytes.len() < 4 {
        return None;
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits = &s[1..4];
    if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: i32 = digits.parse().ok()?;
    Some((sign * magnitude, &s[4..]))
}

fn parse_duration_token(tok: &str) -> Option<f64> {
    let tok = tok.trim();
    let digits = tok.strip_suffix('s')?;
    if digits.is_empty() {
        return None;
    }
    let mut parts = digits.splitn(2, '.');
    let int_part = parts.next().unwrap();
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(frac) = parts.next() {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    digits.parse::<f64>().ok()
}

fn try_parse_buttons(line: &str) -> Result<Option<Vec<MacroStep>>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return Ok(None);
    }
    let (duration_tok, name_toks) = tokens.split_last().unwrap();
    let Some(duration) = parse_duration_token(duration_tok) else {
        return Ok(None);
    };
    if name_toks.is_empty() {
        return Ok(None);
    }
    // The button portion must consist only of uppercase letters and
    // underscores, matching the reference grammar's character class.
    if !name_toks
        .iter()
        .all(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_uppercase() || b == b'_'))
    {
        return Ok(None);
    }

    let mut pressed = ControllerState::neutral();
    for name in name_toks {
        match Button::from_name(name) {
            Some(button) => pressed.set_pressed(button, true),
            None => return Err(Error::MacroParse(format!("Invalid macro command: {line}"))),
        }
    }

    Ok(Some(vec![
        MacroStep {
            state: pressed,
            duration,
        },
        MacroStep {
            state: ControllerState::neutral(),
            duration: 0.0,
        },
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ALL_BUTTONS;

    #[test]
    fn test_simple_button_press() {
        let steps = parse_text("A 0.1s").unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps[0].state.is_pressed(Button::A));
        assert_eq!(steps[0].duration, 0.1);
        assert_eq!(steps[1].duration, 0.0);
        assert!(!steps[1].state.is_pressed(Button::A));
    }

    #[test]
    fn test_button_press_with_wait() {
        let steps = parse_text("A 0.1s\n0.5s").unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].duration, 0.5);
    }

    #[test]
    fn test_multiple_buttons() {
        let steps = parse_text("A B X 0.2s").unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps[0].state.is_pressed(Button::A));
        assert!(steps[0].state.is_pressed(Button::B));
        assert!(steps[0].state.is_pressed(Button::X));
    }

    #[test]
    fn test_stick_input() {
        let steps = parse_text("L_STICK@-100+000 0.3s").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].state.ls, Stick { x: -1.0, y: 0.0 });
        assert_eq!(steps[1].state.ls, Stick::CENTER);
    }

    #[test]
    fn test_stick_neutral() {
        let steps = parse_text("R_STICK@+000+000 0.1s").unwrap();
        assert_eq!(steps[0].state.rs, Stick { x: 0.0, y: 0.0 });
    }

    #[test]
    fn test_stick_diagonal() {
        let steps = parse_text("L_STICK@+050-075 0.2s").unwrap();
        assert_eq!(steps[0].state.ls, Stick { x: 0.5, y: -0.75 });
    }

    #[test]
    fn test_right_stick() {
        let steps = parse_text("R_STICK@+100+100 0.1s").unwrap();
        assert_eq!(steps[0].state.rs, Stick { x: 1.0, y: 1.0 });
    }

    #[test]
    fn test_simple_loop() {
        let steps = parse_text("LOOP 3\n    A 0.1s").unwrap();
        assert_eq!(steps.len(), 6);
    }

    #[test]
    fn test_nested_loop() {
        let text = "LOOP 2\n    A 0.1s\n    LOOP 2\n        B 0.1s";
        let steps = parse_text(text).unwrap();
        // each outer iteration: 2 (A) + 2*2 (nested B loop) = 6, times 2 = 12
        assert_eq!(steps.len(), 12);
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let text = "# a comment\nA 0.1s\n\n# another\nB 0.1s";
        let steps = parse_text(text).unwrap();
        assert_eq!(steps.len(), 4);
    }

    #[test]
    fn test_all_button_mappings() {
        let names = [
            "Y", "X", "B", "A", "R", "ZR", "MINUS", "PLUS", "R_STICK_PRESS", "L_STICK_PRESS",
            "HOME", "CAPTURE", "DPAD_DOWN", "DPAD_UP", "DPAD_RIGHT", "DPAD_LEFT", "L", "ZL",
        ];
        assert_eq!(names.len(), ALL_BUTTONS.len());
        for name in names {
            let button = Button::from_name(name).unwrap();
            let steps = parse_text(&format!("{name} 0.1s")).unwrap();
            assert!(steps[0].state.is_pressed(button));
        }
    }

    #[test]
    fn test_unknown_button_fails_with_invalid_macro_command() {
        let err = parse_text("FOO 0.1s").unwrap_err();
        match err {
            Error::MacroParse(msg) => assert!(msg.starts_with("Invalid macro command:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_over_indentation_fails() {
        let err = parse_text("    A 0.1s").unwrap_err();
        match err {
            Error::MacroParse(msg) => assert!(msg.starts_with("Unexpected indentation")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
