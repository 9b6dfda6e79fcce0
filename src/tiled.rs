//! Loading of the static Tiled resources (`.tmx` layout + `.tsx` tileset).
//!
//! Only the subset the bot needs is read: grid dimensions, CSV tile layers,
//! tileset references, point objects, and per-tile boundary polylines.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::geometry::Vec2;

const GID_FLIP_FLAGS: u32 = 0xE000_0000;
/// Upper bound on `width * height`; every per-cell table is sized from it.
const MAX_CELLS: usize = 1 << 24;

#[derive(Debug, Error)]
pub enum TiledError {
    #[error("failed to read map resource {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("map resource {path} is malformed XML: {source}")]
    Xml {
        path: PathBuf,
        source: roxmltree::Error,
    },
    #[error("map resource {path} is invalid: {message}")]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilesetRef {
    pub first_gid: u32,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayer {
    pub name: String,
    /// Row-major, `width * height` entries, 0 for an empty cell.
    pub gids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapObject {
    pub name: String,
    pub kind: String,
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileMap {
    pub width: u32,
    pub height: u32,
    /// `width * height`, checked when the map is parsed.
    pub cell_count: usize,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tilesets: Vec<TilesetRef>,
    pub layers: Vec<TileLayer>,
    pub objects: Vec<MapObject>,
}

/// A non-empty cell of a layer resolved against its tileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerTile<'a> {
    pub index: usize,
    pub tileset_source: &'a str,
    pub local_id: u32,
}

impl TileMap {
    pub fn resolve_gid(&self, gid: u32) -> Option<(&TilesetRef, u32)> {
        let gid = gid & !GID_FLIP_FLAGS;
        if gid == 0 {
            return None;
        }
        self.tilesets
            .iter()
            .filter(|tileset| tileset.first_gid <= gid)
            .max_by_key(|tileset| tileset.first_gid)
            .map(|tileset| (tileset, gid - tileset.first_gid))
    }

    pub fn layer_tiles<'a>(&'a self, layer: &'a TileLayer) -> impl Iterator<Item = LayerTile<'a>> {
        layer
            .gids
            .iter()
            .enumerate()
            .filter_map(move |(index, gid)| {
                let (tileset, local_id) = self.resolve_gid(*gid)?;
                Some(LayerTile {
                    index,
                    tileset_source: tileset.source.as_str(),
                    local_id,
                })
            })
    }

    pub fn find_object(&self, name: &str) -> Option<&MapObject> {
        self.objects
            .iter()
            .find(|object| object.name == name || object.kind == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileDef {
    /// Tile-local points (origin at the tile's top-left, y down).
    pub boundary: Option<Vec<Vec2>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tileset {
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles: BTreeMap<u32, TileDef>,
}

#[derive(Debug, Clone)]
pub struct MapResources {
    pub map: TileMap,
    pub tileset: Tileset,
    pub tileset_source: String,
    pub fingerprint: String,
}

impl MapResources {
    pub fn load(dir: &Path, map_file: &str, tileset_file: &str) -> Result<Self, TiledError> {
        let map_path = dir.join(map_file);
        let tileset_path = dir.join(tileset_file);
        let map_raw = read_resource(&map_path)?;
        let tileset_raw = read_resource(&tileset_path)?;

        let map = parse_tmx(&map_path, &map_raw)?;
        let tileset = parse_tsx(&tileset_path, &tileset_raw)?;
        if (tileset.tile_width, tileset.tile_height) != (map.tile_width, map.tile_height) {
            return Err(invalid(
                &tileset_path,
                format!(
                    "tile size {}x{} does not match the map's {}x{}",
                    tileset.tile_width, tileset.tile_height, map.tile_width, map.tile_height
                ),
            ));
        }
        let fingerprint = fingerprint(&map_raw, &tileset_raw);

        Ok(MapResources {
            map,
            tileset,
            tileset_source: tileset_file.to_string(),
            fingerprint,
        })
    }
}

fn read_resource(path: &Path) -> Result<String, TiledError> {
    fs::read_to_string(path).map_err(|source| TiledError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn fingerprint(map_raw: &str, tileset_raw: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(map_raw.as_bytes());
    hasher.update([0u8]);
    hasher.update(tileset_raw.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub fn parse_tmx(path: &Path, raw: &str) -> Result<TileMap, TiledError> {
    let doc = Document::parse(raw).map_err(|source| TiledError::Xml {
        path: path.to_path_buf(),
        source,
    })?;
    let root = doc.root_element();
    if root.tag_name().name() != "map" {
        return Err(invalid(path, "root element must be <map>"));
    }

    let width = required_u32(path, root, "width")?;
    let height = required_u32(path, root, "height")?;
    let tile_width = required_u32(path, root, "tilewidth")?;
    let tile_height = required_u32(path, root, "tileheight")?;
    if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
        return Err(invalid(path, "map and tile dimensions must be non-zero"));
    }
    let cell_count = usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(width, height)| width.checked_mul(height))
        .filter(|cells| *cells <= MAX_CELLS)
        .ok_or_else(|| invalid(path, format!("map of {width}x{height} cells is too large")))?;

    let mut tilesets = Vec::new();
    let mut layers = Vec::new();
    let mut objects = Vec::new();
    for child in root.children().filter(|node| node.is_element()) {
        match child.tag_name().name() {
            "tileset" => {
                let first_gid = required_u32(path, child, "firstgid")?;
                let source = child
                    .attribute("source")
                    .or_else(|| child.attribute("name"))
                    .unwrap_or_default()
                    .to_string();
                tilesets.push(TilesetRef { first_gid, source });
            }
            "layer" => {
                let name = child.attribute("name").unwrap_or_default().to_string();
                let gids = parse_layer_data(path, child, &name)?;
                if gids.len() != cell_count {
                    return Err(invalid(
                        path,
                        format!("layer '{name}' has {} cells, expected {cell_count}", gids.len()),
                    ));
                }
                layers.push(TileLayer { name, gids });
            }
            "objectgroup" => {
                for object in child.children().filter(|node| node.has_tag_name("object")) {
                    objects.push(MapObject {
                        name: object.attribute("name").unwrap_or_default().to_string(),
                        kind: object
                            .attribute("type")
                            .or_else(|| object.attribute("class"))
                            .unwrap_or_default()
                            .to_string(),
                        position: Vec2::new(
                            optional_f64(path, object, "x")?,
                            optional_f64(path, object, "y")?,
                        ),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(TileMap {
        width,
        height,
        cell_count,
        tile_width,
        tile_height,
        tilesets,
        layers,
        objects,
    })
}

fn parse_layer_data(path: &Path, layer: Node<'_, '_>, name: &str) -> Result<Vec<u32>, TiledError> {
    let Some(data) = layer.children().find(|node| node.has_tag_name("data")) else {
        return Err(invalid(path, format!("layer '{name}' has no <data>")));
    };
    match data.attribute("encoding") {
        Some("csv") => {}
        other => {
            return Err(invalid(
                path,
                format!(
                    "layer '{name}' uses unsupported encoding {:?}; only csv is read",
                    other.unwrap_or("xml")
                ),
            ))
        }
    }
    data.text()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(|cell| {
            cell.parse::<u32>()
                .map_err(|_| invalid(path, format!("layer '{name}' has bad gid '{cell}'")))
        })
        .collect()
}

pub fn parse_tsx(path: &Path, raw: &str) -> Result<Tileset, TiledError> {
    let doc = Document::parse(raw).map_err(|source| TiledError::Xml {
        path: path.to_path_buf(),
        source,
    })?;
    let root = doc.root_element();
    if root.tag_name().name() != "tileset" {
        return Err(invalid(path, "root element must be <tileset>"));
    }

    let mut tiles = BTreeMap::new();
    for tile in root.children().filter(|node| node.has_tag_name("tile")) {
        let id = required_u32(path, tile, "id")?;
        let boundary = parse_tile_boundary(path, tile)?;
        tiles.insert(id, TileDef { boundary });
    }

    Ok(Tileset {
        tile_width: required_u32(path, root, "tilewidth")?,
        tile_height: required_u32(path, root, "tileheight")?,
        tiles,
    })
}

fn parse_tile_boundary(path: &Path, tile: Node<'_, '_>) -> Result<Option<Vec<Vec2>>, TiledError> {
    let objects = tile
        .children()
        .filter(|node| node.has_tag_name("objectgroup"))
        .flat_map(|group| group.children())
        .filter(|node| node.has_tag_name("object"));
    for object in objects {
        let Some(shape) = object
            .children()
            .find(|node| node.has_tag_name("polyline") || node.has_tag_name("polygon"))
        else {
            continue;
        };
        let origin = Vec2::new(
            optional_f64(path, object, "x")?,
            optional_f64(path, object, "y")?,
        );
        let points = parse_points(path, shape.attribute("points").unwrap_or_default())?;
        return Ok(Some(points.into_iter().map(|point| origin + point).collect()));
    }
    Ok(None)
}

fn parse_points(path: &Path, raw: &str) -> Result<Vec<Vec2>, TiledError> {
    raw.split_whitespace()
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| invalid(path, format!("bad point '{pair}'")))?;
            let x = x.parse::<f64>();
            let y = y.parse::<f64>();
            match (x, y) {
                (Ok(x), Ok(y)) => Ok(Vec2::new(x, y)),
                _ => Err(invalid(path, format!("bad point '{pair}'"))),
            }
        })
        .collect()
}

fn required_u32(path: &Path, node: Node<'_, '_>, name: &str) -> Result<u32, TiledError> {
    let tag = node.tag_name().name();
    let value = node
        .attribute(name)
        .ok_or_else(|| invalid(path, format!("<{tag}> is missing '{name}'")))?;
    value
        .parse::<u32>()
        .map_err(|_| invalid(path, format!("<{tag}> {name}='{value}' is not an integer")))
}

fn optional_f64(path: &Path, node: Node<'_, '_>, name: &str) -> Result<f64, TiledError> {
    match node.attribute(name) {
        None => Ok(0.0),
        Some(value) => value
            .parse::<f64>()
            .map_err(|_| invalid(path, format!("{name}='{value}' is not a number"))),
    }
}

fn invalid(path: &Path, message: impl Into<String>) -> TiledError {
    TiledError::Invalid {
        path: path.to_path_buf(),
        message: message.into(),
    }
}
