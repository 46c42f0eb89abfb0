//! ASCII rendering of the board for the terminal and for prompts.
//! The shield overlay is never shown: it is the defender's secret.

use super::coord::Coord;
use super::grid::{Board, CellContent};

const SYMBOL_EMPTY: char = '.';
const SYMBOL_SHIP: char = 'S';
const SYMBOL_HOSTAGE: char = 'H';

fn symbol(content: CellContent) -> char {
    match content {
        CellContent::Empty => SYMBOL_EMPTY,
        CellContent::Ship => SYMBOL_SHIP,
        CellContent::Hostage => SYMBOL_HOSTAGE,
    }
}

/// Renders the grid with a column-letter header and 1-based row labels.
pub fn render(board: &Board) -> String {
    let mut out = String::new();

    out.push_str("    ");
    for col in 0..board.cols() {
        out.push((b'A' + col as u8) as char);
        out.push(' ');
    }
    out.push('\n');
    out.push_str("   ");
    out.push_str(&"-".repeat(board.cols() * 2));
    out.push('\n');

    for row in 0..board.rows() {
        out.push_str(&format!("{} | ", row + 1));
        for col in 0..board.cols() {
            let content = board
                .content_at(Coord::new(row, col))
                .unwrap_or(CellContent::Empty);
            out.push(symbol(content));
            out.push(' ');
        }
        out.push('\n');
    }

    out
}

pub fn render_with_legend(board: &Board) -> String {
    format!(
        "{}\nLegend:\n  {SYMBOL_SHIP} = Ship\n  {SYMBOL_HOSTAGE} = Hostage\n  {SYMBOL_EMPTY} = Empty\n",
        render(board)
    )
}

/// Prose summary of the board, used when a rendered grid would be wasted on
/// the reader.
pub fn describe(board: &Board) -> String {
    format!(
        "The board is {} rows by {} columns. Rows are numbered 1-{} from the top; \
         columns are lettered A-{} from the left. {} ships and {} hostages remain.",
        board.rows(),
        board.cols(),
        board.rows(),
        (b'A' + (board.cols() - 1) as u8) as char,
        board.ships_remaining(),
        board.hostages_remaining()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_shows_header_rows_and_symbols() {
        let mut board = Board::new(3, 3);
        assert!(board.place(Coord::new(0, 0), CellContent::Ship));
        assert!(board.place(Coord::new(2, 1), CellContent::Hostage));

        let text = render(&board);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0].trim(), "A B C");
        assert!(lines[2].starts_with("1 | S"));
        assert_eq!(lines[4], "3 | . H . ");
    }

    #[test]
    fn legend_names_every_symbol() {
        let board = Board::new(2, 2);
        let text = render_with_legend(&board);
        assert!(text.contains("S = Ship"));
        assert!(text.contains("H = Hostage"));
        assert!(text.contains(". = Empty"));
    }

    #[test]
    fn describe_reports_dimensions_and_counts() {
        let mut board = Board::new(8, 8);
        assert!(board.place(Coord::new(0, 0), CellContent::Ship));
        let text = describe(&board);
        assert!(text.contains("8 rows by 8 columns"));
        assert!(text.contains("1 ships and 0 hostages"));
    }

    #[test]
    fn render_never_reveals_the_shield() {
        let mut board = Board::new(3, 3);
        assert!(board.deploy_shield(Coord::new(1, 1)));
        let text = render_with_legend(&board);
        assert!(!text.to_lowercase().contains("shield"));
        assert_eq!(text.lines().nth(3).unwrap(), "2 | . . . ");
    }
}
