use std::collections::HashMap;

/// A single deformation axis. `min` is the morph value at character weight 0,
/// `max` the value at weight 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Slider {
    pub name: String,
    pub min: f32,
    pub max: f32,
}

impl Slider {
    pub fn new(name: impl Into<String>, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Slider with the same value at both weight endpoints.
    pub fn fixed(name: impl Into<String>, value: f32) -> Self {
        Self::new(name, value, value)
    }

    /// Linear blend between the two endpoints. `weight` is expected in [0, 1].
    pub fn value_at(&self, weight: f32) -> f32 {
        (self.max - self.min) * weight + self.min
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliderSet {
    sliders: HashMap<String, Slider>,
}

impl SliderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slider, composing with an existing one of the same name.
    ///
    /// Each bound of an existing slider is only replaced while it is still
    /// exactly zero and the incoming bound is non-zero, so the first non-zero
    /// value seen for `min` and for `max` sticks.
    pub fn merge(&mut self, slider: Slider) {
        match self.sliders.get_mut(&slider.name) {
            Some(current) => {
                if current.min == 0.0 && slider.min != 0.0 {
                    current.min = slider.min;
                }
                if current.max == 0.0 && slider.max != 0.0 {
                    current.max = slider.max;
                }
            }
            None => {
                self.sliders.insert(slider.name.clone(), slider);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Slider> {
        self.sliders.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sliders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sliders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slider> {
        self.sliders.values()
    }

    /// Every slider evaluated at `weight`, as (name, value) pairs sorted by name.
    pub fn scaled(&self, weight: f32) -> Vec<(&str, f32)> {
        let mut out: Vec<(&str, f32)> = self
            .sliders
            .values()
            .map(|s| (s.name.as_str(), s.value_at(weight)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}

impl FromIterator<Slider> for SliderSet {
    fn from_iter<I: IntoIterator<Item = Slider>>(iter: I) -> Self {
        let mut set = SliderSet::new();
        for slider in iter {
            set.merge(slider);
        }
        set
    }
}

impl Extend<Slider> for SliderSet {
    fn extend<I: IntoIterator<Item = Slider>>(&mut self, iter: I) {
        for slider in iter {
            self.merge(slider);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_non_zero_bound_wins() {
        let mut set = SliderSet::new();
        set.merge(Slider::new("X", 0.0, 0.5));
        set.merge(Slider::new("X", 0.3, 0.0));

        let x = set.get("X").unwrap();
        assert_eq!(x.min, 0.3);
        assert_eq!(x.max, 0.5);

        set.merge(Slider::new("X", 0.9, 0.9));
        let x = set.get("X").unwrap();
        assert_eq!(x.min, 0.3);
        assert_eq!(x.max, 0.5);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn weight_scaling_is_exact_at_endpoints() {
        let s = Slider::new("Breasts", 0.0, 1.0);
        assert_eq!(s.value_at(0.0), 0.0);
        assert_eq!(s.value_at(1.0), 1.0);
        assert_eq!(s.value_at(0.5), 0.5);

        let s = Slider::new("Butt", 0.2, -0.4);
        assert_eq!(s.value_at(0.0), 0.2);
        assert!((s.value_at(1.0) - -0.4).abs() < 1e-6);
    }

    #[test]
    fn scaled_output_is_sorted_by_name() {
        let set: SliderSet = vec![
            Slider::fixed("Waist", 0.1),
            Slider::fixed("Arms", 0.2),
            Slider::fixed("Legs", 0.3),
        ]
        .into_iter()
        .collect();

        let names: Vec<&str> = set.scaled(0.5).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Arms", "Legs", "Waist"]);
    }

    proptest! {
        #[test]
        fn non_zero_bounds_are_never_overwritten(
            first_min in -2.0f32..2.0,
            first_max in -2.0f32..2.0,
            later in proptest::collection::vec((-2.0f32..2.0, -2.0f32..2.0), 0..8),
        ) {
            prop_assume!(first_min != 0.0 && first_max != 0.0);
            let mut set = SliderSet::new();
            set.merge(Slider::new("S", first_min, first_max));
            for (min, max) in later {
                set.merge(Slider::new("S", min, max));
            }
            let s = set.get("S").unwrap();
            prop_assert_eq!(s.min, first_min);
            prop_assert_eq!(s.max, first_max);
        }
    }
}
