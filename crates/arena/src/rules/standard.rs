//! Standard chess rules backed by shakmaty. Positions are exchanged as FEN.

use shakmaty::{
    fen::Fen, san::SanPlus, uci::UciMove, CastlingMode, Chess, EnPassantMode, Move,
    Position as _, Role,
};

use super::{AppliedMove, DrawKind, RulesEngine, RulesError, Terminal};
use crate::types::{Color, LegalMove, MoveRequest, PieceType, Position, Square};

/// Halfmove clock value at which the fifty-move rule ends the game.
const FIFTY_MOVE_HALFMOVES: u32 = 100;

/// [`RulesEngine`] for standard chess.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyRules;

impl ShakmatyRules {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn decode(position: &Position) -> Result<Chess, RulesError> {
        let fen: Fen = position
            .as_str()
            .parse()
            .map_err(|e| RulesError::InvalidPosition(format!("{e}")))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| RulesError::InvalidPosition(format!("{e}")))
    }

    fn encode(chess: &Chess) -> Position {
        Position::new(Fen::from_position(chess.clone(), EnPassantMode::Legal).to_string())
    }

    /// Resolve a request into a legal shakmaty move. A move onto the last
    /// rank without a promotion piece is retried as a queen promotion.
    fn resolve(chess: &Chess, request: &MoveRequest) -> Result<Move, RulesError> {
        match Self::to_legal(chess, request) {
            Ok(m) => Ok(m),
            Err(err) if request.promotion.is_none() => {
                let queened = MoveRequest::new(request.from, request.to, Some(PieceType::Queen));
                Self::to_legal(chess, &queened).map_err(|_| err)
            }
            Err(err) => Err(err),
        }
    }

    fn to_legal(chess: &Chess, request: &MoveRequest) -> Result<Move, RulesError> {
        let uci = request.to_uci();
        let parsed: UciMove = uci
            .parse()
            .map_err(|_| RulesError::IllegalMove(uci.clone()))?;
        let m = parsed
            .to_move(chess)
            .map_err(|_| RulesError::IllegalMove(uci.clone()))?;
        if !chess.is_legal(&m) {
            return Err(RulesError::IllegalMove(uci));
        }
        Ok(m)
    }

    fn describe(chess: &Chess, m: &Move) -> Option<LegalMove> {
        let from = square_from(m.from()?)?;
        let to = square_from(m.to())?;

        let mut after = chess.clone();
        let san = SanPlus::from_move_and_play_unchecked(&mut after, m);

        Some(LegalMove {
            from,
            to,
            promotion: m.promotion().map(piece_from),
            san: san.to_string(),
            captured: m.capture().map(piece_from),
            gives_check: after.is_check(),
            gives_checkmate: after.is_checkmate(),
        })
    }
}

impl RulesEngine for ShakmatyRules {
    fn initial_position(&self) -> Position {
        Self::encode(&Chess::default())
    }

    fn side_to_move(&self, position: &Position) -> Result<Color, RulesError> {
        Ok(color_from(Self::decode(position)?.turn()))
    }

    fn legal_moves(&self, position: &Position) -> Result<Vec<LegalMove>, RulesError> {
        let chess = Self::decode(position)?;
        Ok(chess
            .legal_moves()
            .iter()
            .filter_map(|m| Self::describe(&chess, m))
            .collect())
    }

    fn apply_move(
        &self,
        position: &Position,
        request: &MoveRequest,
    ) -> Result<AppliedMove, RulesError> {
        let chess = Self::decode(position)?;
        let mover = color_from(chess.turn());
        let m = Self::resolve(&chess, request)?;
        let san = SanPlus::from_move(chess.clone(), &m).to_string();
        let promotion = m.promotion().map(piece_from);

        let next = chess
            .play(&m)
            .map_err(|_| RulesError::IllegalMove(request.to_uci()))?;

        Ok(AppliedMove {
            position: Self::encode(&next),
            san,
            promotion,
            mover,
        })
    }

    fn terminal(&self, position: &Position) -> Result<Terminal, RulesError> {
        let chess = Self::decode(position)?;
        let terminal = if chess.is_checkmate() {
            Terminal::Checkmate
        } else if chess.is_stalemate() {
            Terminal::Stalemate
        } else if chess.is_insufficient_material() {
            Terminal::Draw(DrawKind::InsufficientMaterial)
        } else if chess.halfmoves() >= FIFTY_MOVE_HALFMOVES {
            Terminal::Draw(DrawKind::FiftyMoveRule)
        } else {
            Terminal::None
        };
        Ok(terminal)
    }
}

fn color_from(color: shakmaty::Color) -> Color {
    match color {
        shakmaty::Color::White => Color::White,
        shakmaty::Color::Black => Color::Black,
    }
}

fn piece_from(role: Role) -> PieceType {
    match role {
        Role::Pawn => PieceType::Pawn,
        Role::Knight => PieceType::Knight,
        Role::Bishop => PieceType::Bishop,
        Role::Rook => PieceType::Rook,
        Role::Queen => PieceType::Queen,
        Role::King => PieceType::King,
    }
}

fn square_from(sq: shakmaty::Square) -> Option<Square> {
    let index = u32::from(sq);
    Square::new((index % 8) as u8, (index / 8) as u8)
}
