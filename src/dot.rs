//! DOT rendering of a sequence's precedence in-tree, for eyeballing the
//! shape a solver settled on.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::sequence::Sequence;

/// Write `<name>.dot` describing the in-tree of `seq`. Nodes are labeled
/// with the operation dump format; edges point from each operation to its
/// successor.
pub fn write_dot(seq: &Sequence, name: &str) -> io::Result<()> {
    let path = Path::new(name).with_extension("dot");
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(out, "digraph {name} {{")?;
    writeln!(out, "  rankdir = BT;")?;
    writeln!(out, "  node [shape = box, fontname = \"monospace\"];")?;
    for (idx, op) in seq.ops().iter().enumerate() {
        writeln!(out, "  op{idx} [label = \"{op}\"];")?;
    }
    for idx in 0..seq.len() {
        if let Some(parent) = seq.parent(idx) {
            writeln!(out, "  op{idx} -> op{parent};")?;
        }
    }
    writeln!(out, "}}")?;
    out.flush()
}
