//! Animation container (`.tma`).
//!
//! The container is read strictly in order:
//!
//! 1. header, import metadata and the clip summary,
//! 2. the bone table with bind matrices,
//! 3. one track per active bone,
//! 4. the attachment table, whose count repeats the summary,
//! 5. a zero sentinel.

use glam::{Quat, Vec3};
use log::{debug, warn};

use crate::{
    constants::ContainerKind,
    cursor::{table_len, Emitter, Walker},
    error::{FormatError, Violation},
    header::{ContainerHeader, ImportMetadata},
    rotation::RotationSignPolicy,
    skeleton::{Bone, Skeleton, MIN_BONE_SIZE},
    validate::{expect_at_most, expect_eq, expect_near, UNIT_TOLERANCE},
    DecodeParams,
};

mod format;

use format::{AnimationSummary, MIN_ATTACHMENT_SIZE, MIN_TRACK_SIZE};
pub use format::{AnimationAttachment, BoneTrack, PositionKeys, RotationKeys};

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationFile {
    pub import_metadata: ImportMetadata,
    pub frame_count: u32,
    /// Clip length in seconds.
    pub playtime: f32,
    pub root_position: Vec3,
    /// Second copy of the root position, kept as stored.
    pub root_position_duplicate: Vec3,
    pub bones: Vec<Bone>,
    /// Tracks of the active bones.
    pub tracks: Vec<BoneTrack>,
    pub attachments: Vec<AnimationAttachment>,
}

impl AnimationFile {
    pub fn new(frame_count: u32, playtime: f32) -> Self {
        Self {
            import_metadata: ImportMetadata::empty(),
            frame_count,
            playtime,
            root_position: Vec3::ZERO,
            root_position_duplicate: Vec3::ZERO,
            bones: Vec::new(),
            tracks: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn skeleton(&self) -> Skeleton<'_> {
        Skeleton::new(&self.bones)
    }

    pub fn track(&self, bone_name: &str) -> Option<&BoneTrack> {
        self.tracks.iter().find(|track| track.bone_name == bone_name)
    }

    /// Frames per second, as the exporter derives the playtime from it.
    pub fn frames_per_second(&self) -> Option<f32> {
        (self.playtime > 0.0).then(|| self.frame_count as f32 / self.playtime)
    }

    /// Rotation of every track at `frame`, keyed by bone name.
    pub fn pose(&self, frame: usize, policy: RotationSignPolicy) -> Vec<(&str, Vec3, Quat)> {
        self.tracks
            .iter()
            .filter_map(|track| {
                let position = track.position.at(frame)?;
                let rotation = track.rotation.at(frame, policy)?;
                Some((track.bone_name.as_str(), position, rotation))
            })
            .collect()
    }

    /// Compacts every track, returning how many changed.
    pub fn compact(&mut self, policy: RotationSignPolicy) -> usize {
        self.tracks
            .iter_mut()
            .map(|track| track.compact(policy))
            .filter(|changed| *changed)
            .count()
    }

    fn summary(&self) -> Result<AnimationSummary, FormatError> {
        Ok(AnimationSummary {
            active_bone_count: table_len("track", self.tracks.len())?,
            frame_count: self.frame_count,
            playtime: self.playtime,
            root_position: self.root_position.to_array(),
            root_position_duplicate: self.root_position_duplicate.to_array(),
            bone_count: table_len("bone", self.bones.len())?,
            attachment_count: table_len("attachment", self.attachments.len())?,
        })
    }
}

pub fn decode(bytes: &[u8]) -> Result<AnimationFile, FormatError> {
    decode_with(bytes, &DecodeParams::default())
}

pub fn decode_with(bytes: &[u8], params: &DecodeParams) -> Result<AnimationFile, FormatError> {
    let mut walker = Walker::new(bytes, params);

    let header: ContainerHeader = walker.read()?;
    header.check(ContainerKind::Animation)?;
    let import_metadata: ImportMetadata = walker.read()?;
    debug!("Import metadata: {} bytes", import_metadata.bytes.len());

    let summary_offset = walker.offset();
    let summary: AnimationSummary = walker.read()?;
    walker.check_at(
        summary_offset,
        expect_at_most(
            "active bone count",
            u64::from(summary.bone_count),
            u64::from(summary.active_bone_count),
        ),
    )?;
    debug!(
        "Animation: {} frames over {}s, {} bones, {} active, {} attachments",
        summary.frame_count,
        summary.playtime,
        summary.bone_count,
        summary.active_bone_count,
        summary.attachment_count
    );

    let bones_offset = walker.offset();
    let bones: Vec<Bone> =
        walker.read_table_args("bone", summary.bone_count, MIN_BONE_SIZE, (false,))?;
    walker.check_at(bones_offset, Skeleton::new(&bones).validate())?;

    walker.ensure_table("track", summary.active_bone_count, MIN_TRACK_SIZE)?;
    let mut tracks = Vec::with_capacity(summary.active_bone_count as usize);
    for _ in 0..summary.active_bone_count {
        let offset = walker.offset();
        let track: BoneTrack = walker.read_args((summary.frame_count,))?;
        walker.check_at(offset, track.validate(summary.frame_count))?;
        warn_unusual_track(&track, &bones);
        tracks.push(track);
    }
    debug!("Read {} tracks", tracks.len());

    let count_offset = walker.offset();
    let attachment_count: u32 = walker.read()?;
    walker.check_at(
        count_offset,
        expect_eq("repeated attachment count", summary.attachment_count, attachment_count),
    )?;
    walker.ensure_table("attachment", attachment_count, MIN_ATTACHMENT_SIZE)?;
    let mut attachments = Vec::with_capacity(attachment_count as usize);
    for _ in 0..attachment_count {
        let offset = walker.offset();
        let attachment: AnimationAttachment = walker.read()?;
        walker.check_at(offset, attachment.validate(bones.len()))?;
        if !attachment.is_time_normalized() {
            warn!(
                "Attachment {:?} has time {} outside the clip",
                attachment.name, attachment.time
            );
        }
        attachments.push(attachment);
    }

    let sentinel: u32 = walker.read()?;
    walker.check(expect_eq("trailing sentinel", 0, sentinel))?;
    walker.finish()?;

    Ok(AnimationFile {
        import_metadata,
        frame_count: summary.frame_count,
        playtime: summary.playtime,
        root_position: Vec3::from_array(summary.root_position),
        root_position_duplicate: Vec3::from_array(summary.root_position_duplicate),
        bones,
        tracks,
        attachments,
    })
}

fn warn_unusual_track(track: &BoneTrack, bones: &[Bone]) {
    if !bones.iter().any(|bone| bone.name == track.bone_name) {
        warn!("Track {:?} has no matching bone", track.bone_name);
    }
    if track
        .trailer
        .iter()
        .any(|value| expect_near("track trailer", 1.0, *value, 1e-3).is_err())
    {
        warn!(
            "Track {:?} has unusual trailing values {:?}",
            track.bone_name, track.trailer
        );
    }
    if let RotationKeys::Animated(frames) = &track.rotation {
        let policy = RotationSignPolicy::default();
        if let Some(frame) = frames
            .iter()
            .position(|packed| (packed.decode(policy).length() - 1.0).abs() > UNIT_TOLERANCE)
        {
            warn!(
                "Track {:?} has a non-unit rotation at frame {}",
                track.bone_name, frame
            );
        }
    }
}

pub fn encode(file: &AnimationFile) -> Result<Vec<u8>, FormatError> {
    let summary = file.summary()?;
    let mut emitter = Emitter::new();

    emitter.write(&ContainerHeader::new(ContainerKind::Animation))?;
    emitter.write(&file.import_metadata)?;
    emitter.check(expect_at_most(
        "active bone count",
        u64::from(summary.bone_count),
        u64::from(summary.active_bone_count),
    ))?;
    emitter.write(&summary)?;

    emitter.check(Skeleton::new(&file.bones).validate())?;
    emitter.check(Skeleton::new(&file.bones).validate_collision(false))?;
    for bone in &file.bones {
        emitter.write_args(bone, (false,))?;
    }

    for track in &file.tracks {
        emitter.check(track.validate(file.frame_count))?;
        emitter.write_args(track, (file.frame_count,))?;
    }

    emitter.write(&summary.attachment_count)?;
    for attachment in &file.attachments {
        emitter.check(attachment.validate(file.bones.len()))?;
        emitter.write(attachment)?;
    }

    emitter.write(&0u32)?;
    debug!(
        "Encoded animation with {} tracks into {} bytes",
        file.tracks.len(),
        emitter.offset()
    );
    Ok(emitter.into_bytes())
}

/// Checks the model without encoding it.
pub fn validate(file: &AnimationFile) -> Result<(), Violation> {
    Skeleton::new(&file.bones).validate()?;
    expect_at_most(
        "active bone count",
        file.bones.len() as u64,
        file.tracks.len() as u64,
    )?;
    file.tracks
        .iter()
        .try_for_each(|track| track.validate(file.frame_count))?;
    file.attachments
        .iter()
        .try_for_each(|attachment| attachment.validate(file.bones.len()))
}
