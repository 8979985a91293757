//! Output interface towards a spiking layer
//!
//! Cells are numbered layer by layer; within a layer, pixels are row-major.

use crate::grid::Grid;

/// Location of an output cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPosition {
    /// Output layer (index into the designated modules)
    pub layer: usize,
    /// Column
    pub column: usize,
    /// Row
    pub row: usize,
}

/// Per-cell rates (Hz) of the designated output modules, valid until the next step
#[derive(Debug)]
pub struct OutputPort<'a> {
    layers: Vec<&'a Grid>,
}

impl<'a> OutputPort<'a> {
    pub(crate) fn new(layers: Vec<&'a Grid>) -> Self {
        Self { layers }
    }

    /// Number of layers
    pub fn layers(&self) -> usize {
        self.layers.len()
    }

    /// Grid of layer `i`
    pub fn layer(&self, i: usize) -> Option<&'a Grid> {
        self.layers.get(i).copied()
    }

    /// Number of addressable cells
    pub fn len(&self) -> usize {
        self.layers.iter().map(|g| g.len()).sum()
    }

    /// True when no output layer is designated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Where cell `cell` lives
    pub fn cell_position(&self, cell: usize) -> Option<CellPosition> {
        let per_layer = self.layers.first()?.len();
        if per_layer == 0 {
            return None;
        }
        let layer = cell / per_layer;
        let grid = self.layers.get(layer)?;
        let pixel = cell % per_layer;
        Some(CellPosition {
            layer,
            column: pixel % grid.columns(),
            row: pixel / grid.columns(),
        })
    }

    /// Rate of cell `cell`
    pub fn value(&self, cell: usize) -> Option<f64> {
        let pos = self.cell_position(cell)?;
        self.layers[pos.layer].get(pos.column, pos.row)
    }

    /// Every rate in cell order
    pub fn values(&self) -> Vec<f64> {
        self.layers
            .iter()
            .flat_map(|g| g.as_slice().iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_numbering_across_layers() {
        let on = Grid::from_vec(3, 2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let off = Grid::filled(3, 2, 9.0);
        let port = OutputPort::new(vec![&on, &off]);

        assert_eq!(port.len(), 12);
        assert_eq!(port.value(4), Some(4.0));
        assert_eq!(port.value(7), Some(9.0));
        assert_eq!(port.value(12), None);

        let pos = port.cell_position(10).unwrap();
        assert_eq!((pos.layer, pos.column, pos.row), (1, 1, 1));
        assert_eq!(port.values().len(), 12);
    }

    #[test]
    fn test_empty_port() {
        let port = OutputPort::new(Vec::new());
        assert!(port.is_empty());
        assert_eq!(port.value(0), None);
    }
}
