//! Position corpus builder (`build-corpus`).
//! Reads games from a PGN file, then repeatedly picks a random game and a ply uniformly in
//! `[0, game length]` and records that position with its last move and check square.
//! Moves are resolved with shakmaty; a game is cut at its first unplayable move.

use std::path::Path;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::{CastlingMode, Chess, EnPassantMode, File, Move, Position as _, Square};
use tracing::{debug, info};

use crate::corpus::Position;
use crate::error::{CorpusError, Error, Result};

const RESULTS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];
const PROGRESS_EVERY: usize = 1_000;

/// A replayable mainline.
pub struct Game {
    start: Chess,
    moves: Vec<Move>,
}

impl Game {
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// Corpus entry for the position after `ply` half-moves.
    pub fn position_at(&self, ply: usize) -> Position {
        let mut pos = self.start.clone();
        for m in &self.moves[..ply] {
            pos.play_unchecked(m.clone());
        }

        let check_square = if pos.is_check() {
            pos.board().king_of(pos.turn()).map(|sq| sq.to_string())
        } else {
            None
        };
        let last_move = ply.checked_sub(1).map(|i| uci(&self.moves[i]));

        Position {
            board_encoding: Fen::from_position(&pos, EnPassantMode::Legal).to_string(),
            last_move,
            check_square,
        }
    }
}

/// Coordinate notation; castling is written as the king's two-square move.
pub fn uci(m: &Move) -> String {
    if let Move::Castle { king, rook } = *m {
        let file = if rook.file() > king.file() { File::G } else { File::C };
        return format!("{}{}", king, Square::from_coords(file, king.rank()));
    }

    let mut out = String::with_capacity(5);
    if let Some(from) = m.from() {
        out.push_str(&from.to_string());
    }
    out.push_str(&m.to().to_string());
    if let Some(role) = m.promotion() {
        out.push(role.char());
    }
    out
}

/// Splits PGN text into games. Stops after `max_games` usable games.
pub fn parse_games(text: &str, max_games: usize) -> Vec<Game> {
    let mut games = Vec::new();
    let mut fen_tag: Option<String> = None;
    let mut movetext = String::new();
    // Inside a tag block, and whether a blank line has closed it.
    let mut in_tags = false;
    let mut tags_closed = false;

    for line in text.lines() {
        if games.len() >= max_games {
            break;
        }
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            // A tag after movetext or after a closed tag block opens the next game.
            if tags_closed || !movetext.trim().is_empty() {
                finish_game(&mut fen_tag, &mut movetext, &mut games);
            }
            in_tags = true;
            tags_closed = false;
            if let Some(("FEN", value)) = parse_tag(trimmed) {
                fen_tag = Some(value.to_string());
            }
        } else {
            if trimmed.is_empty() {
                tags_closed |= in_tags;
            } else {
                tags_closed = false;
            }
            in_tags = false;
            movetext.push_str(line);
            movetext.push('\n');
        }
    }
    if games.len() < max_games {
        finish_game(&mut fen_tag, &mut movetext, &mut games);
    }
    games
}

fn finish_game(fen_tag: &mut Option<String>, movetext: &mut String, games: &mut Vec<Game>) {
    if !movetext.trim().is_empty() {
        if let Some(game) = build_game(fen_tag.as_deref(), movetext) {
            games.push(game);
            if games.len() % PROGRESS_EVERY == 0 {
                info!(games = games.len(), "reading games");
            }
        }
    }
    *fen_tag = None;
    movetext.clear();
}

fn parse_tag(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (name, rest) = inner.split_once(char::is_whitespace)?;
    let value = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((name, value))
}

fn build_game(fen_tag: Option<&str>, movetext: &str) -> Option<Game> {
    let start: Chess = match fen_tag {
        Some(fen) => {
            let parsed: Fen = match fen.parse() {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(fen, error = %e, "skipping game with bad FEN tag");
                    return None;
                }
            };
            match parsed.into_position(CastlingMode::Standard) {
                Ok(pos) => pos,
                Err(e) => {
                    debug!(fen, error = %e, "skipping game with illegal FEN tag");
                    return None;
                }
            }
        }
        None => Chess::default(),
    };

    let mut pos = start.clone();
    let mut moves = Vec::new();
    for token in movetext_tokens(movetext) {
        if RESULTS.contains(&token) {
            break;
        }
        let Some(san) = san_text(token) else {
            continue;
        };
        let m = match San::from_ascii(san.as_bytes()).map(|s| s.to_move(&pos)) {
            Ok(Ok(m)) => m,
            _ => {
                debug!(token, ply = moves.len(), "unplayable move, truncating game");
                break;
            }
        };
        moves.push(m.clone());
        pos.play_unchecked(m);
    }
    Some(Game { start, moves })
}

/// Whitespace-separated movetext tokens outside comments and variations.
fn movetext_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_brace = false;
    let mut in_line_comment = false;
    let mut depth = 0usize;

    for (i, c) in text.char_indices() {
        if in_line_comment {
            in_line_comment = c != '\n';
            continue;
        }
        if in_brace {
            in_brace = c != '}';
            continue;
        }
        if c.is_whitespace() || matches!(c, '{' | '}' | '(' | ')' | ';') {
            if let Some(s) = start.take() {
                if depth == 0 {
                    tokens.push(&text[s..i]);
                }
            }
            match c {
                '{' => in_brace = true,
                ';' => in_line_comment = true,
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let (Some(s), 0) = (start, depth) {
        tokens.push(&text[s..]);
    }
    tokens
}

/// Strips move numbers and annotation glyphs; `None` for tokens that are not moves.
fn san_text(token: &str) -> Option<&str> {
    if token.starts_with('$') {
        return None;
    }
    let san = token
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches('.')
        .trim_end_matches(['+', '#', '!', '?']);
    (!san.is_empty()).then_some(san)
}

/// Draws `count` positions: random game, then a ply uniform over that game.
pub fn sample_positions<R: Rng + ?Sized>(games: &[Game], count: usize, rng: &mut R) -> Vec<Position> {
    let mut out = Vec::with_capacity(count);
    if games.is_empty() {
        return out;
    }
    while out.len() < count {
        let game = &games[rng.random_range(0..games.len())];
        let ply = rng.random_range(0..=game.len());
        out.push(game.position_at(ply));
        if out.len() % PROGRESS_EVERY == 0 {
            info!(positions = out.len(), "sampling positions");
        }
    }
    out
}

pub struct BuildOptions {
    pub max_games: usize,
    pub count: usize,
    pub seed: Option<u64>,
}

/// Reads `pgn`, samples positions and writes them to `output` as a JSON array.
pub fn build_corpus(pgn: &Path, output: &Path, options: &BuildOptions) -> Result<usize> {
    let text = std::fs::read_to_string(pgn).map_err(|source| CorpusError::Io {
        path: pgn.to_path_buf(),
        source,
    })?;

    let games = parse_games(&text, options.max_games);
    if games.is_empty() {
        return Err(Error::CorpusEmpty("game"));
    }
    info!(games = games.len(), path = %pgn.display(), "read games");

    let mut rng = match options.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::seed_from_u64(rand::random()),
    };
    let positions = sample_positions(&games, options.count, &mut rng);

    let json = serde_json::to_string(&positions).map_err(|e| CorpusError::Write {
        path: output.to_path_buf(),
        reason: e.to_string(),
    })?;
    std::fs::write(output, json).map_err(|e| CorpusError::Write {
        path: output.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!(positions = positions.len(), path = %output.display(), "wrote position corpus");
    Ok(positions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::PositionCorpus;
    use crate::testutil::scratch_dir;

    const PGN: &str = r#"[Event "Rated Blitz game"]
[White "a"]
[Black "b"]
[Result "0-1"]

1. f3 e5 2. g4?? Qh4# 0-1

[Event "Rated Blitz game"]
[Result "1-0"]

1. e4 { [%clk 0:03:00] } 1... e5 2. Nf3 (2. Qh5 Nc6 3. Bc4) 2... Nc6 $1 3. Bc4 Bc5
4. O-O ; castles
1-0

[Event "Endgame"]
[SetUp "1"]
[FEN "8/4P3/8/8/8/8/k7/4K3 w - - 0 1"]

1. e8=Q *
"#;

    #[test]
    fn test_tokens_skip_comments_and_variations() {
        let tokens = movetext_tokens("1. e4 {a (b) c} e5 (1... c5 (1... c6)) 2. Nf3 ; rest\n Nc6 $2");
        assert_eq!(tokens, vec!["1.", "e4", "e5", "2.", "Nf3", "Nc6", "$2"]);
    }

    #[test]
    fn test_san_text() {
        assert_eq!(san_text("12."), None);
        assert_eq!(san_text("12...Nf6"), Some("Nf6"));
        assert_eq!(san_text("Qh4#"), Some("Qh4"));
        assert_eq!(san_text("g4??"), Some("g4"));
        assert_eq!(san_text("$14"), None);
    }

    #[test]
    fn test_parse_games() {
        let games = parse_games(PGN, 10);
        assert_eq!(games.len(), 3);
        assert_eq!(games[0].len(), 4);
        assert_eq!(games[1].len(), 7);
        assert_eq!(games[2].len(), 1);

        assert_eq!(parse_games(PGN, 2).len(), 2);
    }

    #[test]
    fn test_position_at_check_and_last_move() {
        let games = parse_games(PGN, 10);
        let mate = games[0].position_at(4);
        assert_eq!(mate.last_move.as_deref(), Some("d8h4"));
        assert_eq!(mate.check_square.as_deref(), Some("e1"));
        assert!(mate.verify().is_ok());

        let root = games[0].position_at(0);
        assert_eq!(root.last_move, None);
        assert_eq!(root.board_encoding, "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
    }

    #[test]
    fn test_uci_castling_and_promotion() {
        let games = parse_games(PGN, 10);
        assert_eq!(games[1].position_at(7).last_move.as_deref(), Some("e1g1"));
        let promoted = games[2].position_at(1);
        assert_eq!(promoted.last_move.as_deref(), Some("e7e8q"));
        assert!(promoted.board_encoding.starts_with("4Q3/"));
    }

    #[test]
    fn test_illegal_move_truncates_game() {
        let games = parse_games("1. e4 e5 2. Ke3 Nc6 *\n", 10);
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].len(), 2);
    }

    #[test]
    fn test_headers_only_game_does_not_leak_fen() {
        let text = "[FEN \"8/4P3/8/8/8/8/k7/4K3 w - - 0 1\"]\n\n[Event \"b\"]\n\n1. e4 e5 2. Nf3 *\n";
        let games = parse_games(text, 10);
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].len(), 3);
        assert_eq!(
            games[0].position_at(0).board_encoding,
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn test_build_corpus_round_trips_through_loader() {
        let dir = scratch_dir("pgn_build");
        let pgn = dir.join("games.pgn");
        let out = dir.join("fens.json");
        std::fs::write(&pgn, PGN).unwrap();

        let written = build_corpus(
            &pgn,
            &out,
            &BuildOptions { max_games: 10, count: 50, seed: Some(3) },
        )
        .unwrap();
        assert_eq!(written, 50);

        let corpus = PositionCorpus::load(&out, true).unwrap();
        assert_eq!(corpus.len(), 50);
    }

    #[test]
    fn test_build_corpus_without_games() {
        let dir = scratch_dir("pgn_empty");
        let pgn = dir.join("empty.pgn");
        std::fs::write(&pgn, "[Event \"nothing\"]\n").unwrap();
        assert!(matches!(
            build_corpus(&pgn, &dir.join("out.json"), &BuildOptions { max_games: 10, count: 5, seed: None }),
            Err(Error::CorpusEmpty("game"))
        ));
    }
}
