use anyhow::bail;
use rand::Rng;

use super::coord::Coord;

/// What a board cell holds. Exactly one per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellContent {
    Empty,
    Ship,
    Hostage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    OutOfBounds,
    /// A shield absorbed the shot. The underlying cell content survives.
    Blocked,
    Hit(CellContent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endgame {
    Win,
    Lose,
    InProgress,
}

/// The shared game board: a grid of cell contents plus the single-turn
/// shield overlay. Mutated only by the turn orchestrator.
#[derive(Debug, Clone)]
pub struct Board {
    rows: usize,
    cols: usize,
    grid: Vec<Vec<CellContent>>,
    shield: Option<Coord>,
}

impl Board {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            grid: vec![vec![CellContent::Empty; cols]; rows],
            shield: None,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn content_at(&self, coord: Coord) -> Option<CellContent> {
        if !self.in_bounds(coord) {
            return None;
        }
        Some(self.grid[coord.row][coord.col])
    }

    fn in_bounds(&self, coord: Coord) -> bool {
        coord.row < self.rows && coord.col < self.cols
    }

    /// Places content into an empty in-bounds cell. Returns false (and
    /// leaves the board untouched) otherwise.
    pub fn place(&mut self, coord: Coord, content: CellContent) -> bool {
        if !self.in_bounds(coord) {
            return false;
        }
        if self.grid[coord.row][coord.col] != CellContent::Empty {
            return false;
        }
        self.grid[coord.row][coord.col] = content;
        true
    }

    /// Scatters the starting fleet and hostages into random empty cells.
    pub fn setup(
        &mut self,
        ships: usize,
        hostages: usize,
        rng: &mut impl Rng,
    ) -> anyhow::Result<()> {
        if ships + hostages > self.rows * self.cols {
            bail!(
                "board {}x{} cannot hold {} ships and {} hostages",
                self.rows,
                self.cols,
                ships,
                hostages
            );
        }
        for (count, content) in [(ships, CellContent::Ship), (hostages, CellContent::Hostage)] {
            let mut placed = 0;
            while placed < count {
                let coord = Coord::new(rng.gen_range(0..self.rows), rng.gen_range(0..self.cols));
                if self.place(coord, content) {
                    placed += 1;
                }
            }
        }
        Ok(())
    }

    /// Resolves a shot. A shielded cell absorbs the shot and consumes the
    /// shield without touching the underlying content; otherwise the cell's
    /// content is returned and ships/hostages are cleared off the board.
    pub fn fire(&mut self, coord: Coord) -> FireOutcome {
        if !self.in_bounds(coord) {
            return FireOutcome::OutOfBounds;
        }
        if self.shield == Some(coord) {
            self.shield = None;
            return FireOutcome::Blocked;
        }
        let content = self.grid[coord.row][coord.col];
        match content {
            CellContent::Ship | CellContent::Hostage => {
                self.grid[coord.row][coord.col] = CellContent::Empty;
            }
            CellContent::Empty => {}
        }
        FireOutcome::Hit(content)
    }

    /// Activates the single-turn shield. At most one may be active; fails if
    /// one already is, or the target is out of bounds.
    pub fn deploy_shield(&mut self, coord: Coord) -> bool {
        if !self.in_bounds(coord) || self.shield.is_some() {
            return false;
        }
        self.shield = Some(coord);
        true
    }

    pub fn shielded_at(&self, coord: Coord) -> bool {
        self.shield == Some(coord)
    }

    /// Shields are off the table once the defender is down to a single ship.
    pub fn shields_allowed(&self) -> bool {
        self.ships_remaining() > 1
    }

    fn count(&self, content: CellContent) -> usize {
        self.grid
            .iter()
            .flatten()
            .filter(|c| **c == content)
            .count()
    }

    pub fn ships_remaining(&self) -> usize {
        self.count(CellContent::Ship)
    }

    pub fn hostages_remaining(&self) -> usize {
        self.count(CellContent::Hostage)
    }

    /// Win is checked strictly before Lose: clearing the last ship wins even
    /// if the last hostage fell on the same shot.
    pub fn check_endgame(&self) -> Endgame {
        if self.ships_remaining() == 0 {
            return Endgame::Win;
        }
        if self.hostages_remaining() == 0 {
            return Endgame::Lose;
        }
        Endgame::InProgress
    }

    /// Clears the shield overlay. Called once at the top of every turn,
    /// before any firing or shielding.
    pub fn start_turn(&mut self) {
        self.shield = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn board_with(content: &[(Coord, CellContent)]) -> Board {
        let mut board = Board::new(8, 8);
        for (coord, c) in content {
            assert!(board.place(*coord, *c));
        }
        board
    }

    #[test]
    fn firing_a_ship_clears_it_and_decrements_the_scan_count() {
        let target = Coord::parse("C2", 8, 8).unwrap();
        let mut board = board_with(&[
            (target, CellContent::Ship),
            (Coord::new(4, 4), CellContent::Ship),
            (Coord::new(0, 0), CellContent::Hostage),
        ]);
        assert_eq!(board.ships_remaining(), 2);

        assert_eq!(board.fire(target), FireOutcome::Hit(CellContent::Ship));
        assert_eq!(board.ships_remaining(), 1);

        // Same square again: nothing left to hit.
        assert_eq!(board.fire(target), FireOutcome::Hit(CellContent::Empty));
        assert_eq!(board.ships_remaining(), 1);
    }

    #[test]
    fn fire_out_of_bounds_is_signalled_without_mutation() {
        let mut board = board_with(&[(Coord::new(0, 0), CellContent::Ship)]);
        assert_eq!(board.fire(Coord::new(9, 0)), FireOutcome::OutOfBounds);
        assert_eq!(board.ships_remaining(), 1);
    }

    #[test]
    fn shield_blocks_once_and_the_content_survives_into_the_next_turn() {
        let target = Coord::parse("D4", 8, 8).unwrap();
        let mut board = board_with(&[
            (target, CellContent::Hostage),
            (Coord::new(0, 0), CellContent::Ship),
        ]);

        assert!(board.deploy_shield(target));
        assert_eq!(board.fire(target), FireOutcome::Blocked);
        assert_eq!(board.hostages_remaining(), 1);

        // Shield was consumed; the next turn starts clean and the hostage is
        // still there to hit.
        board.start_turn();
        assert!(!board.shielded_at(target));
        assert_eq!(board.fire(target), FireOutcome::Hit(CellContent::Hostage));
        assert_eq!(board.hostages_remaining(), 0);
    }

    #[test]
    fn only_one_shield_may_be_active() {
        let mut board = Board::new(8, 8);
        assert!(board.deploy_shield(Coord::new(1, 1)));
        assert!(!board.deploy_shield(Coord::new(2, 2)));
        assert!(!board.deploy_shield(Coord::new(1, 1)));

        board.start_turn();
        assert!(board.deploy_shield(Coord::new(2, 2)));
    }

    #[test]
    fn shield_rejects_out_of_bounds() {
        let mut board = Board::new(8, 8);
        assert!(!board.deploy_shield(Coord::new(8, 0)));
    }

    #[test]
    fn place_rejects_occupied_and_out_of_bounds_cells() {
        let mut board = Board::new(8, 8);
        assert!(board.place(Coord::new(3, 3), CellContent::Ship));
        assert!(!board.place(Coord::new(3, 3), CellContent::Hostage));
        assert!(!board.place(Coord::new(0, 8), CellContent::Ship));
        assert_eq!(board.content_at(Coord::new(3, 3)), Some(CellContent::Ship));
    }

    #[test]
    fn win_takes_precedence_when_both_counts_hit_zero() {
        let board = Board::new(8, 8);
        assert_eq!(board.ships_remaining(), 0);
        assert_eq!(board.hostages_remaining(), 0);
        assert_eq!(board.check_endgame(), Endgame::Win);
    }

    #[test]
    fn endgame_transitions() {
        let ship = Coord::new(0, 0);
        let hostage = Coord::new(1, 1);
        let mut board = board_with(&[
            (ship, CellContent::Ship),
            (hostage, CellContent::Hostage),
        ]);
        assert_eq!(board.check_endgame(), Endgame::InProgress);

        board.fire(hostage);
        assert_eq!(board.check_endgame(), Endgame::Lose);

        board.fire(ship);
        assert_eq!(board.check_endgame(), Endgame::Win);
    }

    #[test]
    fn setup_places_the_requested_counts() {
        let mut board = Board::new(8, 8);
        let mut rng = StdRng::seed_from_u64(7);
        board.setup(5, 3, &mut rng).unwrap();
        assert_eq!(board.ships_remaining(), 5);
        assert_eq!(board.hostages_remaining(), 3);
    }

    #[test]
    fn setup_rejects_an_overfull_board() {
        let mut board = Board::new(2, 2);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(board.setup(3, 2, &mut rng).is_err());
    }

    #[test]
    fn shields_disabled_at_one_ship() {
        let mut board = board_with(&[
            (Coord::new(0, 0), CellContent::Ship),
            (Coord::new(1, 0), CellContent::Ship),
        ]);
        assert!(board.shields_allowed());
        board.fire(Coord::new(1, 0));
        assert!(!board.shields_allowed());
    }
}
