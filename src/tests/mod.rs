mod test_utils;
mod test_leg_tree;
