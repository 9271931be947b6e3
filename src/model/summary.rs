//! Layer table produced by `Sequential::describe`.

use std::fmt;

use serde::Serialize;

/// One row of a model summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: &'static str,
    pub output_shape: Vec<usize>,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

/// Layer-by-layer description of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    pub fn trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.trainable_params).sum()
    }

    pub fn non_trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.non_trainable_params).sum()
    }

    pub fn total_params(&self) -> usize {
        self.trainable_params() + self.non_trainable_params()
    }

    pub fn output_shape(&self) -> Option<&[usize]> {
        self.layers.last().map(|l| l.output_shape.as_slice())
    }
}

fn shape_text(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(usize::to_string).collect();
    format!("(None, {})", dims.join(", "))
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(64);
        writeln!(f, "{:<28}{:<24}{:>12}", "Layer (type)", "Output Shape", "Param #")?;
        writeln!(f, "{rule}")?;
        for layer in &self.layers {
            writeln!(
                f,
                "{:<28}{:<24}{:>12}",
                format!("{} ({})", layer.name, layer.kind),
                shape_text(&layer.output_shape),
                layer.trainable_params + layer.non_trainable_params
            )?;
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "Total params: {}", self.total_params())?;
        writeln!(f, "Trainable params: {}", self.trainable_params())?;
        write!(f, "Non-trainable params: {}", self.non_trainable_params())
    }
}
