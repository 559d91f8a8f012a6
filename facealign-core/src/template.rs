use crate::align::AlignmentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of points in the dlib/iBUG landmark scheme
pub const LANDMARK_COUNT: usize = 68;

/// Mean face shape of the 68-point scheme in its own (unbounded) coordinate space.
/// Downstream models are trained against these exact values; do not edit.
pub const RAW_TEMPLATE: [(f32, f32); LANDMARK_COUNT] = [
    (0.0792396913815, 0.339223741112), (0.0829219487236, 0.456955367943),
    (0.0967927109165, 0.575648016728), (0.122141515615, 0.691921601066),
    (0.168687863544, 0.800341263616), (0.239789390707, 0.895732504778),
    (0.325662452515, 0.977068762493), (0.422318282013, 1.04329000149),
    (0.531777802068, 1.06080371126), (0.641296298053, 1.03981924107),
    (0.738105872266, 0.972268833998), (0.824444363295, 0.889624082279),
    (0.894792677532, 0.792494155836), (0.939395486253, 0.681546643421),
    (0.96111933829, 0.562238253072), (0.970579841181, 0.441758925744),
    (0.971193274221, 0.322118743967), (0.163846223133, 0.249151738053),
    (0.21780354657, 0.204255863861), (0.291299351124, 0.192367318323),
    (0.367460241458, 0.203582210627), (0.4392945113, 0.233135599851),
    (0.586445962425, 0.228141644834), (0.660152671635, 0.195923841854),
    (0.737466449096, 0.182360984545), (0.813236546239, 0.192828009114),
    (0.8707571886, 0.235293377042), (0.51534533827, 0.31863546193),
    (0.516221448289, 0.396200446263), (0.517118861835, 0.473797687758),
    (0.51816430343, 0.553157797772), (0.433701156035, 0.604054457668),
    (0.475501237769, 0.62076344024), (0.520712933176, 0.634268222208),
    (0.565874114041, 0.618796581487), (0.607054002672, 0.60157671656),
    (0.252418718401, 0.331052263829), (0.298663015648, 0.302646354002),
    (0.355749724218, 0.303020650651), (0.403718978315, 0.33867711083),
    (0.352507175597, 0.349987615384), (0.296791759886, 0.350478978225),
    (0.631326076346, 0.334136672344), (0.679073381078, 0.29645404267),
    (0.73597236153, 0.294721285802), (0.782865376271, 0.321305281656),
    (0.740312274764, 0.341849376713), (0.68499850091, 0.343734332172),
    (0.353167761422, 0.746189164237), (0.414587777921, 0.719053835073),
    (0.477677654595, 0.706835892494), (0.522732900812, 0.717092275768),
    (0.569832064287, 0.705414478982), (0.635195811927, 0.71565572516),
    (0.69951672331, 0.739419187253), (0.639447159575, 0.805236879972),
    (0.576410514055, 0.835436670169), (0.525398405766, 0.841706377792),
    (0.47641545769, 0.837505914975), (0.41379548902, 0.810045601727),
    (0.380084785646, 0.749979603086), (0.477955996282, 0.74513234612),
    (0.523389793327, 0.748924302636), (0.571057789237, 0.74332894691),
    (0.672409137852, 0.744177032192), (0.572539621444, 0.776609286626),
    (0.5240106503, 0.783370783245), (0.477561227414, 0.778476346951),
];

const INNER_EYES_AND_BOTTOM_LIP: [usize; 3] = [39, 42, 57];
const OUTER_EYES_AND_NOSE: [usize; 3] = [36, 45, 33];
const ALL_POINTS: [usize; LANDMARK_COUNT] = {
    let mut indices = [0; LANDMARK_COUNT];
    let mut i = 0;
    while i < LANDMARK_COUNT {
        indices[i] = i;
        i += 1;
    }
    indices
};

/// Which template landmarks take part in transform estimation.
///
/// Index order matters: the i-th detected point is paired with the i-th
/// template point of the same subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkSubset {
    /// Inner eye corners and the bottom lip (39, 42, 57)
    InnerEyesAndBottomLip,
    /// Outer eye corners and the nose tip (36, 45, 33)
    OuterEyesAndNose,
    /// Every landmark, 0 through 67
    AllPoints,
}

impl LandmarkSubset {
    pub const ALL: [LandmarkSubset; 3] = [
        LandmarkSubset::InnerEyesAndBottomLip,
        LandmarkSubset::OuterEyesAndNose,
        LandmarkSubset::AllPoints,
    ];

    pub fn indices(self) -> &'static [usize] {
        match self {
            LandmarkSubset::InnerEyesAndBottomLip => &INNER_EYES_AND_BOTTOM_LIP,
            LandmarkSubset::OuterEyesAndNose => &OUTER_EYES_AND_NOSE,
            LandmarkSubset::AllPoints => &ALL_POINTS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LandmarkSubset::InnerEyesAndBottomLip => "inner_eyes_and_bottom_lip",
            LandmarkSubset::OuterEyesAndNose => "outer_eyes_and_nose",
            LandmarkSubset::AllPoints => "all_points",
        }
    }

    /// Smallest landmark set length this subset can index into
    pub fn required_landmarks(self) -> usize {
        self.indices().iter().max().map_or(0, |max| max + 1)
    }
}

impl fmt::Display for LandmarkSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LandmarkSubset {
    type Err = AlignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        LandmarkSubset::ALL
            .into_iter()
            .find(|subset| subset.name() == normalized)
            .ok_or_else(|| {
                AlignmentError::InvalidArgument(format!("unknown landmark subset: {:?}", s))
            })
    }
}

lazy_static::lazy_static! {
    static ref SHARED_TEMPLATE: TemplateModel = TemplateModel::new();
}

/// Canonical landmark geometry in raw and min-max normalized form.
///
/// Index `i` of both arrays denotes the same anatomical landmark.
#[derive(Debug, Clone)]
pub struct TemplateModel {
    raw: [(f32, f32); LANDMARK_COUNT],
    normalized: [(f32, f32); LANDMARK_COUNT],
}

impl TemplateModel {
    /// Build the model from [`RAW_TEMPLATE`]
    pub fn new() -> Self {
        let raw = RAW_TEMPLATE;

        let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
        let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for &(x, y) in &raw {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        // Both extents are fixed by the literal table and are non-zero
        let (range_x, range_y) = (max_x - min_x, max_y - min_y);
        let normalized = raw.map(|(x, y)| ((x - min_x) / range_x, (y - min_y) / range_y));

        Self { raw, normalized }
    }

    /// Process-wide instance, built on first use and never mutated
    pub fn shared() -> &'static TemplateModel {
        &SHARED_TEMPLATE
    }

    pub fn raw(&self) -> &[(f32, f32); LANDMARK_COUNT] {
        &self.raw
    }

    pub fn normalized(&self) -> &[(f32, f32); LANDMARK_COUNT] {
        &self.normalized
    }

    pub fn raw_point(&self, index: usize) -> Option<(f32, f32)> {
        self.raw.get(index).copied()
    }

    pub fn normalized_point(&self, index: usize) -> Option<(f32, f32)> {
        self.normalized.get(index).copied()
    }

    pub fn subset_indices(&self, subset: LandmarkSubset) -> &'static [usize] {
        subset.indices()
    }

    /// Look up a subset by its string name (e.g. `"outer_eyes_and_nose"`)
    pub fn subset_indices_by_name(&self, name: &str) -> Result<&'static [usize], AlignmentError> {
        Ok(name.parse::<LandmarkSubset>()?.indices())
    }

    /// Raw template points for a subset, in subset order
    pub fn raw_subset(&self, subset: LandmarkSubset) -> Vec<(f32, f32)> {
        subset.indices().iter().map(|&i| self.raw[i]).collect()
    }

    /// Normalized template points for a subset, in subset order
    pub fn normalized_subset(&self, subset: LandmarkSubset) -> Vec<(f32, f32)> {
        subset.indices().iter().map(|&i| self.normalized[i]).collect()
    }
}

impl Default for TemplateModel {
    fn default() -> Self {
        Self::new()
    }
}
