use super::{Coordinate, GeoError};
use serde::{Deserialize, Serialize};

/// 地图视口。西南角经度大于东北角经度表示跨越 180° 经线。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south_west: Coordinate,
    pub north_east: Coordinate,
}

impl BoundingBox {
    pub fn new(south_west: Coordinate, north_east: Coordinate) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    pub fn validate(&self) -> Result<(), GeoError> {
        let (sw, ne) = (self.south_west, self.north_east);
        for (name, lat) in [("south-west", sw.lat), ("north-east", ne.lat)] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(GeoError::InvalidBoundingBox(format!(
                    "{name} latitude {lat} outside [-90, 90]"
                )));
            }
        }
        for (name, lng) in [("south-west", sw.lng), ("north-east", ne.lng)] {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(GeoError::InvalidBoundingBox(format!(
                    "{name} longitude {lng} outside [-180, 180]"
                )));
            }
        }
        if sw.lat > ne.lat {
            return Err(GeoError::InvalidBoundingBox(format!(
                "south-west latitude {} is north of north-east latitude {}",
                sw.lat, ne.lat
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.south_west.lng > self.north_east.lng
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        if lat < self.south_west.lat || lat > self.north_east.lat {
            return false;
        }
        if self.crosses_antimeridian() {
            lng >= self.south_west.lng || lng <= self.north_east.lng
        } else {
            lng >= self.south_west.lng && lng <= self.north_east.lng
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn bbox(sw_lat: f64, sw_lng: f64, ne_lat: f64, ne_lng: f64) -> BoundingBox {
        BoundingBox::new(Coordinate::new(sw_lat, sw_lng), Coordinate::new(ne_lat, ne_lng))
    }

    #[test]
    fn validation() {
        assert!(bbox(35.0, 139.0, 36.0, 140.0).is_valid());
        assert!(bbox(-90.0, -180.0, 90.0, 180.0).is_valid());
        assert!(bbox(10.0, 170.0, 20.0, -170.0).is_valid());
        assert!(!bbox(-91.0, 0.0, 0.0, 0.0).is_valid());
        assert!(!bbox(0.0, 0.0, 90.5, 0.0).is_valid());
        assert!(!bbox(0.0, -180.1, 1.0, 0.0).is_valid());
        assert!(!bbox(0.0, 0.0, 1.0, 181.0).is_valid());
        assert!(!bbox(36.0, 139.0, 35.0, 140.0).is_valid());
    }

    #[test]
    fn contains_regular_box() {
        let b = bbox(35.0, 139.0, 36.0, 140.0);
        assert!(b.contains(35.5, 139.5));
        assert!(b.contains(35.0, 139.0));
        assert!(b.contains(36.0, 140.0));
        assert!(!b.contains(40.0, 139.5));
        assert!(!b.contains(35.5, 140.5));
    }

    #[test]
    fn contains_across_antimeridian() {
        let b = bbox(-20.0, 170.0, 0.0, -170.0);
        assert!(b.crosses_antimeridian());
        assert!(b.contains(-10.0, 175.0));
        assert!(b.contains(-10.0, -175.0));
        assert!(b.contains(-10.0, 180.0));
        assert!(!b.contains(-10.0, 0.0));
        assert!(!b.contains(5.0, 175.0));
    }

    #[test]
    fn random_points_match_interval_rule() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let sw_lat = rng.gen_range(-90.0..90.0);
            let ne_lat = rng.gen_range(sw_lat..=90.0);
            let sw_lng = rng.gen_range(-180.0..=180.0);
            let ne_lng = rng.gen_range(-180.0..=180.0);
            let b = bbox(sw_lat, sw_lng, ne_lat, ne_lng);
            let lat = rng.gen_range(-90.0..=90.0);
            let lng = rng.gen_range(-180.0..=180.0);

            let lat_ok = lat >= sw_lat && lat <= ne_lat;
            let lng_ok = if sw_lng <= ne_lng {
                lng >= sw_lng && lng <= ne_lng
            } else {
                lng >= sw_lng || lng <= ne_lng
            };
            assert_eq!(b.contains(lat, lng), lat_ok && lng_ok);
        }
    }
}
