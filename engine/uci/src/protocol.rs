//! UCI line parsing and printing.

use engine_core::{format_move, STARTPOS_FEN};
use mcts::{BestMoveInfo, GoParams, Score, ThinkingInfo};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed UCI line: {0}")]
    Malformed(String),
}

/// A parsed GUI-to-engine command.
#[derive(Debug, Clone)]
pub enum UciCommand {
    Uci,
    IsReady,
    UciNewGame,
    SetOption { name: String, value: String },
    Position { fen: String, moves: Vec<String> },
    Go(GoParams),
    Stop,
    PonderHit,
    Quit,
}

/// Parse one line from the GUI. Unknown leading tokens are skipped, as
/// the protocol requires, so `joho debug on uci` still parses as `uci`.
pub fn parse_line(line: &str) -> Result<UciCommand, ProtocolError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    for (i, &token) in tokens.iter().enumerate() {
        let rest = &tokens[i + 1..];
        match token {
            "uci" => return Ok(UciCommand::Uci),
            "isready" => return Ok(UciCommand::IsReady),
            "ucinewgame" => return Ok(UciCommand::UciNewGame),
            "setoption" => return parse_setoption(rest, line),
            "position" => return parse_position(rest, line),
            "go" => return Ok(UciCommand::Go(parse_go(rest))),
            "stop" => return Ok(UciCommand::Stop),
            "ponderhit" => return Ok(UciCommand::PonderHit),
            "quit" => return Ok(UciCommand::Quit),
            _ => continue,
        }
    }
    Err(ProtocolError::Malformed(line.to_string()))
}

fn parse_setoption(tokens: &[&str], line: &str) -> Result<UciCommand, ProtocolError> {
    // setoption name <name...> [value <value...>]
    if tokens.first() != Some(&"name") {
        return Err(ProtocolError::Malformed(line.to_string()));
    }
    let rest = &tokens[1..];
    let value_at = rest.iter().position(|&t| t == "value");
    let (name_tokens, value_tokens) = match value_at {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, &[][..]),
    };
    if name_tokens.is_empty() {
        return Err(ProtocolError::Malformed(line.to_string()));
    }
    Ok(UciCommand::SetOption {
        name: name_tokens.join(" "),
        value: value_tokens.join(" "),
    })
}

fn parse_position(tokens: &[&str], line: &str) -> Result<UciCommand, ProtocolError> {
    let (fen, rest) = match tokens.first() {
        Some(&"startpos") => (STARTPOS_FEN.to_string(), &tokens[1..]),
        Some(&"fen") => {
            let moves_at = tokens.iter().position(|&t| t == "moves");
            let fen_end = moves_at.unwrap_or(tokens.len());
            if fen_end <= 1 {
                return Err(ProtocolError::Malformed(line.to_string()));
            }
            (tokens[1..fen_end].join(" "), &tokens[fen_end..])
        }
        _ => return Err(ProtocolError::Malformed(line.to_string())),
    };
    let moves = match rest.first() {
        Some(&"moves") => rest[1..].iter().map(|s| s.to_string()).collect(),
        _ => Vec::new(),
    };
    Ok(UciCommand::Position { fen, moves })
}

fn parse_go(tokens: &[&str]) -> GoParams {
    let mut params = GoParams::default();
    let mut i = 0;
    let int_after = |tokens: &[&str], i: usize| -> Option<i64> {
        tokens.get(i + 1).and_then(|t| t.parse().ok())
    };
    while i < tokens.len() {
        match tokens[i] {
            "wtime" => {
                params.wtime = int_after(tokens, i);
                i += 2;
            }
            "btime" => {
                params.btime = int_after(tokens, i);
                i += 2;
            }
            "winc" => {
                params.winc = int_after(tokens, i);
                i += 2;
            }
            "binc" => {
                params.binc = int_after(tokens, i);
                i += 2;
            }
            "movestogo" => {
                params.movestogo = int_after(tokens, i);
                i += 2;
            }
            "movetime" => {
                params.movetime = int_after(tokens, i);
                i += 2;
            }
            "nodes" => {
                params.nodes = int_after(tokens, i);
                i += 2;
            }
            "depth" => {
                params.depth = int_after(tokens, i);
                i += 2;
            }
            "infinite" => {
                params.infinite = true;
                i += 1;
            }
            "ponder" => {
                params.ponder = true;
                i += 1;
            }
            "searchmoves" => {
                i += 1;
                while i < tokens.len() && looks_like_move(tokens[i]) {
                    params.searchmoves.push(tokens[i].to_string());
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    params
}

fn looks_like_move(token: &str) -> bool {
    let bytes = token.as_bytes();
    (4..=5).contains(&bytes.len())
        && bytes[0].is_ascii_lowercase()
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_lowercase()
        && bytes[3].is_ascii_digit()
}

// ---------------------------------------------------------------------
// Engine-to-GUI output
// ---------------------------------------------------------------------

pub fn format_id(name: &str, author: &str) -> Vec<String> {
    vec![format!("id name {name}"), format!("id author {author}")]
}

pub fn format_options(lines: &[String]) -> String {
    lines.join("\n")
}

pub fn format_info(info: &ThinkingInfo, chess960: bool) -> String {
    let mut out = format!(
        "info depth {} seldepth {} time {} nodes {} nps {} hashfull {} tbhits {}",
        info.depth, info.seldepth, info.time_ms, info.nodes, info.nps, info.hashfull, info.tb_hits
    );
    match info.score {
        Score::Cp(cp) => out.push_str(&format!(" score cp {cp}")),
        Score::Mate(n) => out.push_str(&format!(" score mate {n}")),
    }
    if !info.pv.is_empty() {
        out.push_str(" pv");
        for mv in &info.pv {
            out.push(' ');
            out.push_str(&format_move(mv, chess960));
        }
    }
    out
}

pub fn format_bestmove(best: &BestMoveInfo, chess960: bool) -> String {
    match (&best.best, &best.ponder) {
        (Some(b), Some(p)) => format!(
            "bestmove {} ponder {}",
            format_move(b, chess960),
            format_move(p, chess960)
        ),
        (Some(b), None) => format!("bestmove {}", format_move(b, chess960)),
        _ => "bestmove (none)".to_string(),
    }
}
