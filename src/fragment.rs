//! Fragment table entry type

/// One entry in the external fragment table, as produced by
/// [`crate::fragment_packer::FragmentPacker`] and consumed by the injected
/// [`crate::collaborators::FragmentTable`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FragmentEntry {
    pub offset: u64,
    pub size: u32,
    pub compressed: bool,
}
