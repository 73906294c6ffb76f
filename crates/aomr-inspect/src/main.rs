//! aomr-inspect - summarize and check Age of Mythology Retold containers.

use std::{error::Error, fs, path::PathBuf};

use aomr_asset::{
    probe,
    tma::{self, AnimationFile},
    tmm::{self, MeshFile},
    ContainerKind, DecodeParams, RotationSignPolicy,
};
use clap::{Parser, ValueEnum};
use log::{info, warn};

#[derive(Clone, Copy, ValueEnum)]
enum SignPolicy {
    /// Stored components are used as written
    Verbatim,
    /// Stored components are mirrored the way the game writes them
    Mirrored,
}

impl From<SignPolicy> for RotationSignPolicy {
    fn from(policy: SignPolicy) -> Self {
        match policy {
            SignPolicy::Verbatim => RotationSignPolicy::Verbatim,
            SignPolicy::Mirrored => RotationSignPolicy::Mirrored,
        }
    }
}

#[derive(Parser)]
#[command(name = "aomr-inspect")]
#[command(about = "Summarize and check .tma and .tmm containers")]
#[command(version)]
struct Cli {
    /// Input .tma or .tmm file
    input: PathBuf,

    /// Geometry buffer of a mesh (defaults to the input path with `.data` appended)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Re-encode the decoded model and compare with the input bytes
    #[arg(long)]
    verify: bool,

    /// How stored rotation components are interpreted
    #[arg(long, value_enum, default_value = "mirrored")]
    sign_policy: SignPolicy,

    /// Warn about bytes after the last record instead of failing
    #[arg(long)]
    allow_trailing: bool,

    /// Turn animated tracks that never change into static ones
    #[arg(long)]
    compact: bool,

    /// Write the re-encoded container here
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let bytes = fs::read(&cli.input)?;
    let params = DecodeParams {
        reject_trailing_bytes: !cli.allow_trailing,
        ..Default::default()
    };

    let kind = probe(&bytes)?;
    info!("{} is a {}", cli.input.display(), kind.description());
    let encoded = match kind {
        ContainerKind::Animation => {
            let mut file = tma::decode_with(&bytes, &params)?;
            print_animation(&file, cli.sign_policy.into());
            if cli.compact {
                let changed = file.compact(cli.sign_policy.into());
                println!("compacted {} tracks", changed);
            }
            tma::encode(&file)?
        }
        ContainerKind::Mesh => {
            let file = tmm::decode_with(&bytes, &params)?;
            print_mesh(&file);
            inspect_geometry(&cli, &file, &params)?;
            tmm::encode(&file)?
        }
    };

    if cli.verify {
        verify(&bytes, &encoded)?;
    }
    if let Some(output) = &cli.output {
        fs::write(output, &encoded)?;
        info!("Wrote {} bytes to {}", encoded.len(), output.display());
    }
    Ok(())
}

fn print_animation(file: &AnimationFile, policy: RotationSignPolicy) {
    println!(
        "animation: {} frames, {:.3}s, {} bones, {} tracks, {} attachments",
        file.frame_count,
        file.playtime,
        file.bones.len(),
        file.tracks.len(),
        file.attachments.len()
    );
    if let Some(fps) = file.frames_per_second() {
        println!("  {:.2} frames per second", fps);
    }
    for track in &file.tracks {
        let position = if track.position.is_static() { "static" } else { "animated" };
        let rotation = if track.rotation.is_static() { "static" } else { "animated" };
        let first = track
            .rotation
            .at(0, policy)
            .map(|rotation| format!("{:?}", rotation.to_array()))
            .unwrap_or_default();
        println!(
            "  track {:?}: {} position, {} rotation {}",
            track.bone_name, position, rotation, first
        );
    }
    for attachment in &file.attachments {
        println!(
            "  attachment {:?} at {:.3}{}",
            attachment.name,
            attachment.time,
            if attachment.visible { "" } else { " (hidden)" }
        );
    }
}

fn print_mesh(file: &MeshFile) {
    println!(
        "mesh: {} vertices, {} triangles, {} groups, {} bones, {} attachments",
        file.vertex_count,
        file.triangle_count,
        file.mesh_groups.len(),
        file.bones.len(),
        file.attachments.len()
    );
    for (index, group) in file.mesh_groups.iter().enumerate() {
        let material = file
            .materials
            .get(group.material as usize)
            .map(String::as_str)
            .unwrap_or("?");
        println!(
            "  group {}: {} vertices, {} triangles, material {:?}",
            index,
            group.vertex_count,
            group.triangle_count(),
            material
        );
    }
    for attachment in &file.attachments {
        println!("  attachment {:?}", attachment.name);
    }
    if let Some(heightmap) = &file.heightmap {
        println!("  heightmap {0}x{0}", heightmap.width);
    }
}

fn inspect_geometry(cli: &Cli, file: &MeshFile, params: &DecodeParams) -> Result<(), Box<dyn Error>> {
    let path = match &cli.data {
        Some(path) => path.clone(),
        None => {
            let mut path = cli.input.clone().into_os_string();
            path.push(".data");
            PathBuf::from(path)
        }
    };
    if !path.exists() {
        if cli.data.is_some() {
            return Err(format!("{} does not exist", path.display()).into());
        }
        warn!("No geometry buffer at {}", path.display());
        return Ok(());
    }

    let bytes = fs::read(&path)?;
    let data = tmm::decode_data_with(&bytes, file, params)?;
    println!(
        "geometry: {} vertices, {} triangles, weights {}, heights {}",
        data.vertices.len(),
        data.triangles.len(),
        if data.weights.is_some() { "yes" } else { "no" },
        if data.heights.is_some() { "yes" } else { "no" }
    );
    if cli.verify {
        verify(&bytes, &tmm::encode_data(&data, file)?)?;
    }
    Ok(())
}

fn verify(original: &[u8], encoded: &[u8]) -> Result<(), Box<dyn Error>> {
    if original == encoded {
        println!("re-encoded {} bytes identically", encoded.len());
        return Ok(());
    }
    let first = original
        .iter()
        .zip(encoded)
        .position(|(a, b)| a != b)
        .unwrap_or(original.len().min(encoded.len()));
    Err(format!(
        "re-encoded output differs at offset {:#x} ({} bytes in, {} bytes out)",
        first,
        original.len(),
        encoded.len()
    )
    .into())
}
