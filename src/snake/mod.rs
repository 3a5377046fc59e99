//! Snake on a bounded grid, played by a network.
//!
//! The snake sees 24 inputs (food, body and wall distances in eight
//! directions), picks one of four moves from the argmax of the network's
//! outputs, and scores one point per food eaten. Every move costs one unit of
//! life; eating restores it. Food placement draws from a seeded stream, so an
//! episode is a pure function of the network and the config.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evolve::{EvalContext, Evaluation, EvaluationError, Evaluator};
use crate::matrix::DotKernel;
use crate::network::{argmax, Network, NetworkError};

pub const VISION_INPUTS: usize = 24;
pub const ACTIONS: usize = 4;

/// Ray directions for body and wall vision: ↑ ↗ → ↘ ↓ ↙ ← ↖.
const RAYS: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

#[derive(Debug, Error)]
pub enum SnakeError {
    #[error("invalid snake config: {0}")]
    InvalidConfig(String),
    #[error("snake needs a 24-input, 4-output network, got {inputs}-{outputs}")]
    Topology { inputs: usize, outputs: usize },
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl From<SnakeError> for EvaluationError {
    fn from(err: SnakeError) -> Self {
        match err {
            SnakeError::Network(e) => EvaluationError::Network(e),
            other => EvaluationError::Failed(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnakeConfig {
    pub width: u32,
    pub height: u32,
    /// Moves available after spawning or eating.
    pub life_per_food: u32,
    pub food_seed: u64,
}

impl Default for SnakeConfig {
    fn default() -> Self {
        Self {
            width: 15,
            height: 15,
            life_per_food: 100,
            food_seed: 0,
        }
    }
}

impl SnakeConfig {
    pub fn validate(&self) -> Result<(), SnakeError> {
        if self.width < 2 || self.height < 2 {
            return Err(SnakeError::InvalidConfig(format!(
                "field {}x{} is smaller than 2x2",
                self.width, self.height
            )));
        }
        if self.width > 4096 || self.height > 4096 {
            return Err(SnakeError::InvalidConfig(format!(
                "field {}x{} is too large",
                self.width, self.height
            )));
        }
        if self.life_per_food == 0 {
            return Err(SnakeError::InvalidConfig("life_per_food must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Move {
    Left,
    Down,
    Right,
    Up,
}

impl Move {
    /// Action for output index 0..=3; anything else reads as `Up`.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Move::Left,
            1 => Move::Down,
            2 => Move::Right,
            _ => Move::Up,
        }
    }

    /// Argmax of the network outputs; the first maximum wins.
    pub fn from_outputs(outputs: &[f32]) -> Self {
        Self::from_index(argmax(outputs))
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Move::Left => (-1, 0),
            Move::Down => (0, 1),
            Move::Right => (1, 0),
            Move::Up => (0, -1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnakeGame {
    width: i32,
    height: i32,
    /// Tail at the front, head at the back.
    body: VecDeque<Point>,
    occupied: Vec<bool>,
    food: Option<Point>,
    life: u32,
    life_per_food: u32,
    score: u32,
    alive: bool,
    rng: ChaCha8Rng,
}

impl SnakeGame {
    /// New episode: a one-cell snake at the centre and the first food.
    pub fn new(config: &SnakeConfig) -> Result<Self, SnakeError> {
        config.validate()?;
        let (width, height) = (config.width as i32, config.height as i32);
        let mut game = Self {
            width,
            height,
            body: VecDeque::new(),
            occupied: vec![false; (width * height) as usize],
            food: None,
            life: config.life_per_food,
            life_per_food: config.life_per_food,
            score: 0,
            alive: true,
            rng: ChaCha8Rng::seed_from_u64(config.food_seed),
        };
        game.push_head(Point::new(width / 2, height / 2));
        game.food = game.place_food();
        Ok(game)
    }

    pub fn head(&self) -> Point {
        // The body is never empty after construction.
        self.body.back().copied().unwrap_or(Point::new(0, 0))
    }

    pub fn body(&self) -> impl Iterator<Item = Point> + '_ {
        self.body.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn food(&self) -> Option<Point> {
        self.food
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn life(&self) -> u32 {
        self.life
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn in_bounds(&self, p: Point) -> bool {
        p.x >= 0 && p.y >= 0 && p.x < self.width && p.y < self.height
    }

    fn cell(&self, p: Point) -> usize {
        (p.y * self.width + p.x) as usize
    }

    fn is_occupied(&self, p: Point) -> bool {
        self.in_bounds(p) && self.occupied[self.cell(p)]
    }

    fn push_head(&mut self, p: Point) {
        let cell = self.cell(p);
        self.occupied[cell] = true;
        self.body.push_back(p);
    }

    fn pop_tail(&mut self) {
        if let Some(tail) = self.body.pop_front() {
            let cell = self.cell(tail);
            self.occupied[cell] = false;
        }
    }

    /// A free cell off the head's row and column if one exists, else any free
    /// cell, else none.
    fn place_food(&mut self) -> Option<Point> {
        let head = self.head();
        let mut good = Vec::new();
        let mut free = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let p = Point::new(x, y);
                if self.is_occupied(p) {
                    continue;
                }
                free.push(p);
                if p.x != head.x && p.y != head.y {
                    good.push(p);
                }
            }
        }
        let pool = if good.is_empty() { free } else { good };
        if pool.is_empty() {
            return None;
        }
        Some(pool[self.rng.random_range(0..pool.len())])
    }

    /// Raw (unnormalized) distances: 8 food, 8 body, 8 wall.
    pub fn raw_vision(&self) -> [i32; VISION_INPUTS] {
        let head = self.head();
        let mut out = [0i32; VISION_INPUTS];

        // Food: one octant each, ↖ ↑ ↗ ← → ↙ ↓ ↘.
        if let Some(food) = self.food {
            let (dx, dy) = (head.x - food.x, head.y - food.y);
            let pick = |cond: bool, v: i32| if cond { v } else { 0 };
            out[0] = pick(dx > 0 && dy > 0, dx);
            out[1] = pick(dx == 0 && dy > 0, dy);
            out[2] = pick(dx < 0 && dy > 0, dy);
            out[3] = pick(dx > 0 && dy == 0, dx);
            out[4] = pick(dx < 0 && dy == 0, -dx);
            out[5] = pick(dx > 0 && dy < 0, -dy);
            out[6] = pick(dx == 0 && dy < 0, -dy);
            out[7] = pick(dx < 0 && dy < 0, -dy);
        }

        for (i, &(rx, ry)) in RAYS.iter().enumerate() {
            let mut p = Point::new(head.x + rx, head.y + ry);
            let mut steps = 1;
            while self.in_bounds(p) {
                if self.occupied[self.cell(p)] {
                    out[8 + i] = steps;
                    break;
                }
                p = Point::new(p.x + rx, p.y + ry);
                steps += 1;
            }
        }

        let left = head.x;
        let up = head.y;
        let right = self.width - 1 - head.x;
        let down = self.height - 1 - head.y;
        out[16..].copy_from_slice(&[
            up,
            right.min(up),
            right,
            right.min(down),
            down,
            left.min(down),
            left,
            left.min(up),
        ]);
        out
    }

    /// Network input: each distance divided by the larger field dimension,
    /// then squeezed into (0, 1].
    pub fn vision(&self) -> [f32; VISION_INPUTS] {
        let scale = self.width.max(self.height) as f32;
        self.raw_vision()
            .map(|v| v as f32 / scale * 0.999_999 + 0.000_001)
    }

    /// Apply one move. Costs a unit of life; dies on a wall, on its own body
    /// or when life runs out.
    pub fn step(&mut self, mv: Move) {
        if !self.alive {
            return;
        }
        self.life = self.life.saturating_sub(1);
        let head = self.head();
        let (dx, dy) = mv.delta();
        let next = Point::new(head.x + dx, head.y + dy);
        if self.life == 0 || !self.in_bounds(next) || self.is_occupied(next) {
            self.alive = false;
            return;
        }
        self.push_head(next);
        if self.food == Some(next) {
            self.life = self.life_per_food;
            self.score += 1;
            self.food = self.place_food();
        } else {
            self.pop_tail();
        }
    }

    /// Play to the end with `network` choosing moves. Frames are appended to
    /// `frames` (initial board, then one per move) when given.
    pub fn play(
        &mut self,
        network: &Network,
        kernel: &dyn DotKernel,
        mut frames: Option<&mut Vec<String>>,
    ) -> Result<u32, SnakeError> {
        if network.input_len() != VISION_INPUTS || network.output_len() != ACTIONS {
            return Err(SnakeError::Topology {
                inputs: network.input_len(),
                outputs: network.output_len(),
            });
        }
        if let Some(frames) = frames.as_deref_mut() {
            frames.push(self.render());
        }
        while self.alive {
            let outputs = network.query_with(kernel, &self.vision())?;
            self.step(Move::from_outputs(&outputs));
            if let Some(frames) = frames.as_deref_mut() {
                frames.push(self.render());
            }
        }
        Ok(self.score)
    }

    /// Text frame: `█` border, `O` head, `o` body, `*` food, then remaining life.
    pub fn render(&self) -> String {
        let border: String = "█".repeat(self.width as usize + 2);
        let head = self.head();
        let mut out = String::with_capacity((self.width as usize + 3) * (self.height as usize + 3) * 3);
        out.push_str(&border);
        out.push('\n');
        for y in 0..self.height {
            out.push('█');
            for x in 0..self.width {
                let p = Point::new(x, y);
                let c = if p == head {
                    'O'
                } else if self.is_occupied(p) {
                    'o'
                } else if self.food == Some(p) {
                    '*'
                } else {
                    ' '
                };
                out.push(c);
            }
            out.push('█');
            out.push('\n');
        }
        out.push_str(&border);
        out.push('\n');
        out.push_str(&format!("life - {}", self.life));
        out
    }
}

/// Fitness = food eaten in one episode.
#[derive(Clone, Debug, Default)]
pub struct SnakeEvaluator {
    config: SnakeConfig,
}

impl SnakeEvaluator {
    pub fn new(config: SnakeConfig) -> Result<Self, SnakeError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SnakeConfig {
        &self.config
    }

    /// Replay one episode with frames recorded.
    pub fn replay(&self, network: &Network, kernel: &dyn DotKernel) -> Result<(u32, Vec<String>), SnakeError> {
        let mut game = SnakeGame::new(&self.config)?;
        let mut frames = Vec::new();
        let score = game.play(network, kernel, Some(&mut frames))?;
        Ok((score, frames))
    }
}

impl Evaluator for SnakeEvaluator {
    fn evaluate(&self, network: &Network, ctx: &EvalContext<'_>) -> Result<Evaluation, EvaluationError> {
        let mut game = SnakeGame::new(&self.config)?;
        let mut frames = ctx.record_trace.then(Vec::new);
        let score = game.play(network, ctx.kernel, frames.as_mut())?;
        Ok(Evaluation {
            score: score as f64,
            trace: frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{CpuKernel, Matrix};

    fn game() -> SnakeGame {
        SnakeGame::new(&SnakeConfig::default()).unwrap()
    }

    /// A 24-4 network whose outputs ignore the input and favour `mv`.
    fn constant_mover(mv: Move) -> Network {
        let mut data = vec![0.0; ACTIONS * VISION_INPUTS];
        let row = match mv {
            Move::Left => 0,
            Move::Down => 1,
            Move::Right => 2,
            Move::Up => 3,
        };
        for c in 0..VISION_INPUTS {
            data[row * VISION_INPUTS + c] = 5.0;
        }
        let w = Matrix::from_row_major(ACTIONS, VISION_INPUTS, data).unwrap();
        Network::from_parts(0.1, vec![VISION_INPUTS, ACTIONS], vec![w]).unwrap()
    }

    #[test]
    fn starts_centred_with_food_off_axis() {
        let g = game();
        assert_eq!(g.head(), Point::new(7, 7));
        assert_eq!(g.len(), 1);
        assert_eq!(g.life(), 100);
        let food = g.food().unwrap();
        assert_ne!(food.x, 7);
        assert_ne!(food.y, 7);
    }

    #[test]
    fn wall_vision_from_centre() {
        let raw = game().raw_vision();
        assert_eq!(&raw[16..], &[7; 8]);
        assert_eq!(&raw[8..16], &[0; 8]);
        let food: i32 = raw[..8].iter().filter(|&&v| v != 0).count() as i32;
        assert_eq!(food, 1);
    }

    #[test]
    fn vision_is_normalized() {
        let v = game().vision();
        for x in v {
            assert!(x > 0.0 && x <= 1.0);
        }
        let expected = 7.0 / 15.0 * 0.999_999 + 0.000_001;
        assert!((v[16] - expected).abs() < 1e-6);
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(Move::from_outputs(&[0.1, 0.9, 0.9, 0.2]), Move::Down);
        assert_eq!(Move::from_outputs(&[0.5, 0.5, 0.5, 0.5]), Move::Left);
        assert_eq!(Move::from_outputs(&[0.0, 0.0, 0.0, 1.0]), Move::Up);
    }

    #[test]
    fn walking_into_wall_dies() {
        let mut g = game();
        // Food is never in the start row, so seven left moves reach x == 0.
        for _ in 0..7 {
            g.step(Move::Left);
        }
        assert_eq!(g.head().x, 0);
        assert!(g.is_alive());
        g.step(Move::Left);
        assert!(!g.is_alive());
    }

    #[test]
    fn eating_grows_and_restores_life() {
        let mut g = game();
        let food = g.food().unwrap();
        let head = g.head();
        let horizontal = if food.x < head.x { Move::Left } else { Move::Right };
        let vertical = if food.y < head.y { Move::Up } else { Move::Down };
        for _ in 0..(food.x - head.x).abs() {
            g.step(horizontal);
        }
        for _ in 0..(food.y - head.y).abs() {
            g.step(vertical);
        }
        assert_eq!(g.score(), 1);
        assert_eq!(g.len(), 2);
        assert_eq!(g.life(), 100);
        assert!(g.is_alive());
    }

    #[test]
    fn reversing_into_body_dies() {
        let mut g = game();
        let food = g.food().unwrap();
        let head = g.head();
        let horizontal = if food.x < head.x { Move::Left } else { Move::Right };
        let vertical = if food.y < head.y { Move::Up } else { Move::Down };
        for _ in 0..(food.x - head.x).abs() {
            g.step(horizontal);
        }
        for _ in 0..(food.y - head.y).abs() {
            g.step(vertical);
        }
        assert_eq!(g.len(), 2);
        let back = match vertical {
            Move::Up => Move::Down,
            _ => Move::Up,
        };
        g.step(back);
        assert!(!g.is_alive());
    }

    #[test]
    fn body_vision_sees_neck() {
        let mut g = game();
        let food = g.food().unwrap();
        let head = g.head();
        let horizontal = if food.x < head.x { Move::Left } else { Move::Right };
        let vertical = if food.y < head.y { Move::Up } else { Move::Down };
        for _ in 0..(food.x - head.x).abs() {
            g.step(horizontal);
        }
        for _ in 0..(food.y - head.y).abs() {
            g.step(vertical);
        }
        let raw = g.raw_vision();
        let ray = if vertical == Move::Down { 0 } else { 4 };
        assert_eq!(raw[8 + ray], 1);
    }

    #[test]
    fn life_runs_out() {
        let config = SnakeConfig {
            life_per_food: 3,
            ..SnakeConfig::default()
        };
        let mut g = SnakeGame::new(&config).unwrap();
        // Left and right in the head's row never meet food.
        g.step(Move::Left);
        g.step(Move::Right);
        assert!(g.is_alive());
        g.step(Move::Left);
        assert!(!g.is_alive());
        assert_eq!(g.life(), 0);
    }

    #[test]
    fn render_frame_layout() {
        let frame = game().render();
        let lines: Vec<&str> = frame.lines().collect();
        assert_eq!(lines.len(), 15 + 3);
        assert_eq!(lines[0].chars().count(), 17);
        assert_eq!(lines[8].chars().nth(8), Some('O'));
        assert_eq!(frame.matches('*').count(), 1);
        assert_eq!(lines[17], "life - 100");
    }

    #[test]
    fn play_terminates_and_records_frames() {
        let net = constant_mover(Move::Up);
        let mut g = game();
        let mut frames = Vec::new();
        let score = g.play(&net, &CpuKernel, Some(&mut frames)).unwrap();
        assert_eq!(score, 0);
        // Start frame plus seven moves to the wall plus the fatal move.
        assert_eq!(frames.len(), 1 + 8);
        assert!(!g.is_alive());
    }

    #[test]
    fn play_rejects_wrong_topology() {
        let net = Network::from_parts(
            0.1,
            vec![3, 4],
            vec![Matrix::new(4, 3)],
        )
        .unwrap();
        assert!(matches!(
            game().play(&net, &CpuKernel, None),
            Err(SnakeError::Topology { inputs: 3, outputs: 4 })
        ));
    }

    #[test]
    fn evaluator_is_deterministic() {
        let evaluator = SnakeEvaluator::new(SnakeConfig::default()).unwrap();
        let net = Network::new(0.1, &[24, 18, 18, 4], &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
        let ctx = EvalContext {
            kernel: &CpuKernel,
            generation: 0,
            index: 0,
            record_trace: false,
        };
        let a = evaluator.evaluate(&net, &ctx).unwrap();
        let b = evaluator.evaluate(&net, &ctx).unwrap();
        assert_eq!(a, b);
        assert!(a.trace.is_none());
        let (score, frames) = evaluator.replay(&net, &CpuKernel).unwrap();
        assert_eq!(score as f64, a.score);
        assert!(frames.len() >= 2);
    }

    #[test]
    fn rejects_tiny_field() {
        let config = SnakeConfig {
            width: 1,
            ..SnakeConfig::default()
        };
        assert!(SnakeGame::new(&config).is_err());
        assert!(SnakeEvaluator::new(config).is_err());
    }
}
