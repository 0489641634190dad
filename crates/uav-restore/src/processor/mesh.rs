//! Triangle meshes: generation from depth, refinement, and Wavefront OBJ I/O.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::ProcessError;
use crate::pipeline::{DepthField, StageFunction, StageInput, StageOutput};

use super::open_image;

/// Indexed triangle mesh. Face indices are 0-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

impl Mesh {
    /// Builds a height field over a `grid`×`grid` lattice of depth samples.
    ///
    /// The lattice spans x in `-0.5..=0.5` with y scaled by the image aspect
    /// ratio; z is the sampled depth times `depth_scale`.
    pub fn from_depth(depth: &DepthField, grid: u32, depth_scale: f64) -> Self {
        let cols = grid.min(depth.width()).max(2) as usize;
        let rows = grid.min(depth.height()).max(2) as usize;
        let aspect = f64::from(depth.height()) / f64::from(depth.width());

        let mut vertices = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            let v = r as f64 / (rows - 1) as f64;
            for c in 0..cols {
                let u = c as f64 / (cols - 1) as f64;
                let z = f64::from(depth.sample(u, v)) * depth_scale;
                vertices.push([u - 0.5, (0.5 - v) * aspect, z]);
            }
        }

        let mut faces = Vec::with_capacity((rows - 1) * (cols - 1) * 2);
        for r in 0..rows - 1 {
            for c in 0..cols - 1 {
                let i = r * cols + c;
                faces.push([i, i + cols, i + 1]);
                faces.push([i + 1, i + cols, i + cols + 1]);
            }
        }

        Self { vertices, faces }
    }

    /// Splits every triangle into four through its edge midpoints.
    /// Midpoints of shared edges are shared.
    pub fn subdivide(&self) -> Self {
        let mut vertices = self.vertices.clone();
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut faces = Vec::with_capacity(self.faces.len() * 4);

        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<[f64; 3]>| -> usize {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let (pa, pb) = (vertices[a], vertices[b]);
                vertices.push([
                    (pa[0] + pb[0]) / 2.0,
                    (pa[1] + pb[1]) / 2.0,
                    (pa[2] + pb[2]) / 2.0,
                ]);
                vertices.len() - 1
            })
        };

        for &[a, b, c] in &self.faces {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            faces.push([a, ab, ca]);
            faces.push([ab, b, bc]);
            faces.push([ca, bc, c]);
            faces.push([ab, bc, ca]);
        }

        Self { vertices, faces }
    }

    /// Scales every vertex about the origin.
    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.vertices {
            for coord in v.iter_mut() {
                *coord *= factor;
            }
        }
    }

    pub fn write_obj(&self, path: &Path) -> Result<(), ProcessError> {
        let io_err = |e| ProcessError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);

        writeln!(
            out,
            "# {} vertices, {} faces",
            self.vertices.len(),
            self.faces.len()
        )
        .map_err(io_err)?;
        for [x, y, z] in &self.vertices {
            writeln!(out, "v {:.6} {:.6} {:.6}", x, y, z).map_err(io_err)?;
        }
        for [a, b, c] in &self.faces {
            writeln!(out, "f {} {} {}", a + 1, b + 1, c + 1).map_err(io_err)?;
        }
        out.flush().map_err(io_err)
    }

    /// Reads the `v` and `f` records of an OBJ file. Polygons are
    /// fan-triangulated; texture and normal indices are ignored.
    pub fn read_obj(path: &Path) -> Result<Self, ProcessError> {
        let file = File::open(path).map_err(|e| ProcessError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let invalid = |line_no: usize, reason: &str| ProcessError::InvalidMesh {
            path: path.to_path_buf(),
            reason: format!("line {}: {}", line_no, reason),
        };

        let mut mesh = Mesh::default();
        let mut polygons: Vec<(usize, Vec<usize>)> = Vec::new();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| ProcessError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("v") => {
                    let coords: Vec<f64> = parts
                        .take(3)
                        .map(|p| p.parse::<f64>())
                        .collect::<Result<_, _>>()
                        .map_err(|_| invalid(line_no, "bad vertex coordinate"))?;
                    if coords.len() != 3 {
                        return Err(invalid(line_no, "vertex needs three coordinates"));
                    }
                    mesh.vertices.push([coords[0], coords[1], coords[2]]);
                }
                Some("f") => {
                    let indices: Vec<usize> = parts
                        .map(|p| {
                            p.split('/')
                                .next()
                                .and_then(|i| i.parse::<usize>().ok())
                                .filter(|i| *i > 0)
                                .map(|i| i - 1)
                        })
                        .collect::<Option<_>>()
                        .ok_or_else(|| invalid(line_no, "bad face index"))?;
                    if indices.len() < 3 {
                        return Err(invalid(line_no, "face needs at least three vertices"));
                    }
                    polygons.push((line_no, indices));
                }
                _ => {}
            }
        }

        for (line_no, indices) in polygons {
            if indices.iter().any(|i| *i >= mesh.vertices.len()) {
                return Err(invalid(line_no, "face refers to a missing vertex"));
            }
            for k in 1..indices.len() - 1 {
                mesh.faces.push([indices[0], indices[k], indices[k + 1]]);
            }
        }

        Ok(mesh)
    }
}

/// Mesh generation stage: depth field to height-field mesh.
pub struct GridMesher {
    grid: u32,
    depth_scale: f64,
}

impl GridMesher {
    pub fn new(grid: u32, depth_scale: f64) -> Self {
        Self { grid, depth_scale }
    }
}

impl StageFunction for GridMesher {
    fn run(&self, input: &StageInput) -> Result<StageOutput, ProcessError> {
        let _span = tracing::info_span!("processor.mesh", grid = self.grid).entered();

        // Fall back to the depth map on disk when no field was handed over.
        let depth = match input.depth {
            Some(ref depth) => Arc::clone(depth),
            None => Arc::new(DepthField::from_gray(
                &open_image(&input.artifact)?.to_luma8(),
            )),
        };

        let mesh = Mesh::from_depth(&depth, self.grid, self.depth_scale);
        mesh.write_obj(&input.destination)?;
        tracing::debug!(
            vertices = mesh.vertices.len(),
            faces = mesh.faces.len(),
            "Mesh written"
        );

        Ok(StageOutput::new(input.destination.clone()))
    }
}

/// Refinement stage: subdivides the raw mesh and scales it up.
pub struct MeshRefiner {
    scale: f64,
}

impl MeshRefiner {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }
}

impl StageFunction for MeshRefiner {
    fn run(&self, input: &StageInput) -> Result<StageOutput, ProcessError> {
        let _span = tracing::info_span!("processor.hallucination").entered();

        let mesh = Mesh::read_obj(&input.artifact)?;
        if mesh.faces.is_empty() {
            return Err(ProcessError::InvalidMesh {
                path: input.artifact.clone(),
                reason: "mesh has no faces".to_string(),
            });
        }

        let mut refined = mesh.subdivide();
        refined.scale(self.scale);
        refined.write_obj(&input.destination)?;

        Ok(StageOutput::new(input.destination.clone()))
    }
}
