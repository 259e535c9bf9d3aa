// Callwrap
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Function composition helpers

use std::fmt;

/// One step of a [`Pipeline`]
pub type Stage<T> = Box<dyn Fn(T) -> T + Send + Sync>;

/// Ordered chain of same-typed transformations
pub struct Pipeline<T> {
    stages: Vec<Stage<T>>,
}

impl<T> Pipeline<T> {
    /// The identity pipeline
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage that runs after the existing ones
    pub fn then<F>(mut self, stage: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.stages.push(Box::new(stage));
        self
    }

    /// Prepends a stage that runs before the existing ones
    pub fn before<F>(mut self, stage: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.stages.insert(0, Box::new(stage));
        self
    }

    pub fn run(&self, input: T) -> T {
        self.stages.iter().fold(input, |acc, stage| stage(acc))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages.len()).finish()
    }
}

/// Runs `stages` left to right
pub fn pipe<T>(stages: impl IntoIterator<Item = Stage<T>>) -> Pipeline<T> {
    Pipeline {
        stages: stages.into_iter().collect(),
    }
}

/// Runs `stages` right to left, mathematical composition order
pub fn compose<T>(stages: impl IntoIterator<Item = Stage<T>>) -> Pipeline<T> {
    let mut stages: Vec<Stage<T>> = stages.into_iter().collect();
    stages.reverse();
    Pipeline { stages }
}

/// `g ∘ f` for functions of different types
pub fn chain<A, B, C, F, G>(f: F, g: G) -> impl Fn(A) -> C
where
    F: Fn(A) -> B,
    G: Fn(B) -> C,
{
    move |a| g(f(a))
}

/// Binds the first argument of a two-argument function
pub fn partial<A, B, R, F>(func: F, preset: A) -> impl Fn(B) -> R
where
    A: Clone,
    F: Fn(A, B) -> R,
{
    move |b| func(preset.clone(), b)
}
