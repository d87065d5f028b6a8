/// GPU hook activation state, derived from `CUDA_VISIBLE_DEVICES` rather
/// than from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuSupport {
    pub enabled: bool,
    pub device_ids: Vec<String>,
}

impl GpuSupport {
    /// Inspects the process environment for `CUDA_VISIBLE_DEVICES`. Absent,
    /// empty, or the literal sentinel `NoDevFiles` all mean GPU support is
    /// disabled.
    pub fn detect() -> Self {
        Self::from_env(std::env::var("CUDA_VISIBLE_DEVICES").ok().as_deref())
    }

    pub fn from_env(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() && v != "NoDevFiles" => GpuSupport {
                enabled: true,
                device_ids: v.split(',').map(str::to_string).collect(),
            },
            _ => GpuSupport::default(),
        }
    }
}
