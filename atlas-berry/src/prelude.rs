//! 🧠欢迎光临🔬
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx2dF, Idx3d, Interpolation};

pub use crate::models::{
    AlignmentRecord, HistologySettings, Orientation, Resolution, SettingsError, VolumeSettings,
};

pub use crate::slicer::{
    pixel_to_voxel, plane_shape, slice_volume, CutPlane, SliceError, Volume, VolumeReadError,
    VolumeSlicer,
};

pub use crate::registration::transform::{apply_to_pixel, compose_transform, inverted};
pub use crate::registration::worker::{outline, spawn_mask_worker};
pub use crate::registration::{
    crop_to_shape, forward_image, pad_to_shape, rescale, warp_affine, Mapping,
    NonInvertibleTransform, RegistrationError, Registrator, VolumeCache,
};

pub use crate::builder::{build_aligned_volume, BuildError, BuildOutcome};

pub use crate::io::{
    gather_alignment_paths, load_alignment, load_image, save_alignment, DirectoryMetadata,
};

pub use crate::consts::{ALLOWED_RESOLUTIONS, ATLAS_VOLUME_NAME};
