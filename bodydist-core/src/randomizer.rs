//! Weighted-random trait overlays layered on top of female presets.

use rand::Rng;

use crate::slider::{Slider, SliderSet};

/// `true` with probability `percent` / 100.
fn chance<R: Rng>(rng: &mut R, percent: f64) -> bool {
    rng.gen_bool(percent / 100.0)
}

fn between<R: Rng>(rng: &mut R, low: f32, high: f32) -> f32 {
    rng.gen_range(low..high)
}

fn put(set: &mut SliderSet, name: &str, value: f32) {
    set.merge(Slider::fixed(name, value));
}

pub fn nipple_sliders<R: Rng>(rng: &mut R) -> SliderSet {
    let mut set = SliderSet::new();

    let areola = if chance(rng, 15.0) {
        between(rng, -1.0, 0.0)
    } else {
        between(rng, 0.0, 1.0)
    };
    put(&mut set, "AreolaSize", areola);

    if chance(rng, 75.0) {
        put(&mut set, "AreolaPull_v2", between(rng, -0.25, 1.0));
    }

    let length = if chance(rng, 15.0) {
        between(rng, 0.2, 0.3)
    } else {
        between(rng, 0.0, 0.1)
    };
    put(&mut set, "NippleLength", length);
    put(&mut set, "NippleManga", between(rng, -0.3, 0.8));

    if chance(rng, 25.0) {
        put(&mut set, "NipplePerkManga", between(rng, -0.3, 1.2));
    }
    if chance(rng, 15.0) {
        put(&mut set, "NipBGone", between(rng, 0.6, 1.0));
    }

    put(&mut set, "NippleSize", between(rng, -0.5, 0.3));
    put(&mut set, "NippleDip", between(rng, 0.0, 1.0));
    put(&mut set, "NippleCrease_v2", between(rng, -0.4, 1.0));

    if chance(rng, 6.0) {
        put(&mut set, "NipplePuffy_v2", between(rng, 0.4, 0.7));
    }
    if chance(rng, 35.0) {
        put(&mut set, "NippleThicc_v2", between(rng, 0.0, 0.9));
    }
    if chance(rng, 2.0) {
        let invert = if chance(rng, 50.0) {
            1.0
        } else {
            between(rng, 0.65, 0.8)
        };
        put(&mut set, "NippleInvert_v2", invert);
    }

    set
}

/// Coarse shape family picked first by [`genital_sliders_with_shape`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GenitalShape {
    Innie,
    Average,
    Outie,
}

pub fn genital_sliders<R: Rng>(rng: &mut R) -> SliderSet {
    genital_sliders_with_shape(rng).1
}

/// Genital overlay together with the shape branch that produced it.
///
/// Innie is drawn 20% of the time; otherwise Average is drawn with 75%
/// probability, leaving Outie for the rest.
pub fn genital_sliders_with_shape<R: Rng>(rng: &mut R) -> (GenitalShape, SliderSet) {
    let mut set = SliderSet::new();

    let shape = if chance(rng, 20.0) {
        GenitalShape::Innie
    } else if chance(rng, 75.0) {
        GenitalShape::Average
    } else {
        GenitalShape::Outie
    };

    match shape {
        GenitalShape::Innie => {
            put(&mut set, "Innieoutie", between(rng, 0.95, 1.1));
            if chance(rng, 50.0) {
                put(&mut set, "Labiapuffyness", between(rng, 0.75, 1.25));
            }
            if chance(rng, 40.0) {
                put(&mut set, "LabiaMorePuffyness_v2", between(rng, 0.0, 1.0));
            }
            put(&mut set, "Labiaprotrude", between(rng, 0.0, 0.5));
            put(&mut set, "Labiaprotrude2", between(rng, 0.0, 0.1));
            put(&mut set, "Labiaprotrudeback", between(rng, 0.0, 0.1));
            put(&mut set, "Labiaspread", 0.0);
            put(&mut set, "LabiaCrumpled_v2", between(rng, 0.0, 0.3));
            put(&mut set, "LabiaBulgogi_v2", 0.0);
            put(&mut set, "LabiaNeat_v2", 0.0);
            put(&mut set, "VaginaHole", between(rng, -0.2, 0.05));
            put(&mut set, "Clit", between(rng, -0.4, 0.25));
        }
        GenitalShape::Average => {
            put(&mut set, "Innieoutie", between(rng, 0.4, 0.75));
            if chance(rng, 40.0) {
                put(&mut set, "Labiapuffyness", between(rng, 0.5, 1.0));
            }
            if chance(rng, 30.0) {
                put(&mut set, "LabiaMorePuffyness_v2", between(rng, 0.0, 0.75));
            }
            put(&mut set, "Labiaprotrude", between(rng, 0.0, 0.5));
            put(&mut set, "Labiaprotrude2", between(rng, 0.0, 0.75));
            put(&mut set, "Labiaprotrudeback", between(rng, 0.0, 1.0));
            if chance(rng, 50.0) {
                put(&mut set, "Labiaspread", between(rng, 0.0, 1.0));
                put(&mut set, "LabiaCrumpled_v2", between(rng, 0.0, 0.7));
                if chance(rng, 60.0) {
                    put(&mut set, "LabiaBulgogi_v2", between(rng, 0.0, 0.1));
                }
            } else {
                put(&mut set, "Labiaspread", 0.0);
                put(&mut set, "LabiaCrumpled_v2", between(rng, 0.0, 0.2));
                if chance(rng, 45.0) {
                    put(&mut set, "LabiaBulgogi_v2", between(rng, 0.0, 0.3));
                }
            }
            put(&mut set, "LabiaNeat_v2", 0.0);
            put(&mut set, "VaginaHole", between(rng, -0.2, 0.4));
            put(&mut set, "Clit", between(rng, -0.2, 0.25));
        }
        GenitalShape::Outie => {
            put(&mut set, "Innieoutie", between(rng, -0.25, 0.3));
            if chance(rng, 30.0) {
                put(&mut set, "Labiapuffyness", between(rng, 0.2, 0.5));
            }
            if chance(rng, 10.0) {
                put(&mut set, "LabiaMorePuffyness_v2", between(rng, 0.0, 0.35));
            }
            put(&mut set, "Labiaprotrude", between(rng, 0.0, 1.0));
            put(&mut set, "Labiaprotrude2", between(rng, 0.0, 1.0));
            put(&mut set, "Labiaprotrudeback", between(rng, 0.0, 1.0));
            put(&mut set, "Labiaspread", between(rng, 0.0, 1.0));
            put(&mut set, "LabiaCrumpled_v2", between(rng, 0.0, 1.0));
            put(&mut set, "LabiaBulgogi_v2", between(rng, 0.0, 1.0));
            if chance(rng, 40.0) {
                put(&mut set, "LabiaNeat_v2", between(rng, 0.0, 0.25));
            }
            put(&mut set, "VaginaHole", between(rng, 0.0, 1.0));
            put(&mut set, "Clit", between(rng, -0.4, 0.25));
        }
    }

    put(&mut set, "Vaginasize", between(rng, 0.0, 1.0));
    put(&mut set, "ClitSwell_v2", between(rng, -0.3, 1.1));
    put(&mut set, "Cutepuffyness", between(rng, 0.0, 1.0));
    put(&mut set, "LabiaTightUp", between(rng, 0.0, 1.0));

    let cbpc = if chance(rng, 60.0) {
        between(rng, -0.25, 0.25)
    } else {
        between(rng, 0.6, 1.0)
    };
    put(&mut set, "CBPC", cbpc);

    put(&mut set, "AnalPosition_v2", between(rng, 0.0, 1.0));
    put(&mut set, "AnalTexPos_v2", between(rng, 0.0, 1.0));
    put(&mut set, "AnalTexPosRe_v2", between(rng, 0.0, 1.0));
    put(&mut set, "AnalLoose_v2", -0.1);

    (shape, set)
}
